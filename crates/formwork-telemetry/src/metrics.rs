//! Prometheus metrics.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `formwork_requests_total` | Counter | `chain`, `status` |
//! | `formwork_request_duration_seconds` | Histogram | `chain` |
//! | `formwork_in_flight_requests` | Gauge | - |
//! | `formwork_assertion_rejections_total` | Counter | `reason` |
//!
//! Recording before [`init_metrics`] is a no-op.

use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

/// Requests served, by chain and status.
pub const REQUESTS_TOTAL: &str = "formwork_requests_total";
/// Request latency, by chain.
pub const REQUEST_DURATION_SECONDS: &str = "formwork_request_duration_seconds";
/// Requests currently being processed.
pub const IN_FLIGHT_REQUESTS: &str = "formwork_in_flight_requests";
/// Assertion failures, by reason.
pub const ASSERTION_REJECTIONS_TOTAL: &str = "formwork_assertion_rejections_total";

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsConfig {
    /// Whether the exporter is installed.
    pub enabled: bool,

    /// Listen address of the Prometheus scrape endpoint.
    pub addr: String,

    /// Histogram buckets for request duration, in seconds.
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: "0.0.0.0:9090".to_string(),
            duration_buckets: vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ],
        }
    }
}

impl MetricsConfig {
    /// Parses [`addr`](Self::addr).
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::InvalidAddress`] if it is not a socket address.
    pub fn socket_addr(&self) -> TelemetryResult<SocketAddr> {
        self.addr
            .parse()
            .map_err(|e| TelemetryError::InvalidAddress(format!("{}: {e}", self.addr)))
    }
}

/// Installs the Prometheus recorder and its scrape listener.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns an error if the address is invalid or a recorder is already installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let addr = config.socket_addr()?;
    let mut builder = PrometheusBuilder::new().with_http_listener(addr);
    if !config.duration_buckets.is_empty() {
        builder = builder
            .set_buckets_for_metric(
                Matcher::Full(REQUEST_DURATION_SECONDS.to_string()),
                &config.duration_buckets,
            )
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    }

    let handle = builder
        .install_recorder()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    let _ = METRICS_HANDLE.set(handle);

    describe_metrics();
    Ok(())
}

/// Renders the current metrics in Prometheus text format.
///
/// Returns `None` before [`init_metrics`].
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn describe_metrics() {
    describe_counter!(REQUESTS_TOTAL, "Total number of HTTP requests processed");
    describe_histogram!(REQUEST_DURATION_SECONDS, "HTTP request duration in seconds");
    describe_gauge!(
        IN_FLIGHT_REQUESTS,
        "Number of HTTP requests currently being processed"
    );
    describe_counter!(
        ASSERTION_REJECTIONS_TOTAL,
        "Requests rejected by assertion verification"
    );
}

/// Records a completed request against the chain that served it.
pub fn record_request(chain: &str, status_code: u16, duration: Duration) {
    counter!(
        REQUESTS_TOTAL,
        "chain" => chain.to_string(),
        "status" => status_code.to_string()
    )
    .increment(1);

    histogram!(REQUEST_DURATION_SECONDS, "chain" => chain.to_string())
        .record(duration.as_secs_f64());
}

/// Records an assertion rejection.
pub fn record_assertion_rejection(reason: &str) {
    counter!(ASSERTION_REJECTIONS_TOTAL, "reason" => reason.to_string()).increment(1);
}

/// Tracks one in-flight request for as long as it is alive.
#[derive(Debug)]
pub struct InFlightGuard {
    _private: (),
}

impl InFlightGuard {
    /// Increments the in-flight gauge.
    #[must_use]
    pub fn new() -> Self {
        gauge!(IN_FLIGHT_REQUESTS).increment(1.0);
        Self { _private: () }
    }
}

impl Default for InFlightGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        gauge!(IN_FLIGHT_REQUESTS).decrement(1.0);
    }
}
