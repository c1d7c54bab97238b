//! The root configuration type.

use crate::{AssertionSection, ConfigError, PipelineSection, ServerSection};
use formwork_telemetry::{LogConfig, MetricsConfig};
use serde::Deserialize;
use std::net::SocketAddr;

/// Complete service configuration.
///
/// Load it with [`ConfigLoader`](crate::ConfigLoader).
///
/// ```
/// use formwork_config::FormworkConfig;
///
/// let config = FormworkConfig::default();
/// assert_eq!(config.server.http_addr, "0.0.0.0:8080");
/// assert_eq!(config.assertion.timestamp_skew_secs, 60);
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(default, deny_unknown_fields)]
pub struct FormworkConfig {
    /// HTTP listener.
    pub server: ServerSection,

    /// Middleware chains.
    pub pipeline: PipelineSection,

    /// Cross-service assertions.
    pub assertion: AssertionSection,

    /// Log output.
    pub logging: LogConfig,

    /// Prometheus exporter.
    pub metrics: MetricsConfig,
}

impl FormworkConfig {
    /// Pretty, debug-level logs and no metrics listener.
    #[must_use]
    pub fn development() -> Self {
        Self {
            logging: LogConfig::development(),
            metrics: MetricsConfig {
                enabled: false,
                ..MetricsConfig::default()
            },
            ..Self::default()
        }
    }

    /// Checks values serde cannot.
    ///
    /// # Errors
    ///
    /// Returns the first problem found:
    /// - `server.http_addr` is not a socket address
    /// - `assertion.shared_secret` is shorter than 32 characters while chains are enabled
    /// - `assertion.timestamp_skew_secs` is zero
    /// - a binding names an unknown chain type
    /// - `metrics.addr` is not a socket address while metrics are enabled
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.http_addr.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::invalid_value(
                "server.http_addr",
                format!("invalid socket address: {}", self.server.http_addr),
            ));
        }

        if self.pipeline.enabled {
            let secret_len = self.assertion.shared_secret.chars().count();
            if secret_len == 0 {
                return Err(ConfigError::missing_field("assertion.shared_secret"));
            }
            if secret_len < AssertionSection::MIN_SECRET_LEN {
                return Err(ConfigError::invalid_value(
                    "assertion.shared_secret",
                    format!(
                        "must be at least {} characters",
                        AssertionSection::MIN_SECRET_LEN
                    ),
                ));
            }
        }

        if self.assertion.timestamp_skew_secs == 0 {
            return Err(ConfigError::invalid_value(
                "assertion.timestamp_skew_secs",
                "must be greater than zero",
            ));
        }

        for (name, chain_type) in &self.pipeline.bindings {
            if !self.pipeline.knows_chain_type(chain_type) {
                return Err(ConfigError::invalid_value(
                    format!("pipeline.bindings.{name}"),
                    format!("unknown chain type: {chain_type}"),
                ));
            }
        }

        if self.metrics.enabled && self.metrics.socket_addr().is_err() {
            return Err(ConfigError::invalid_value(
                "metrics.addr",
                format!("invalid socket address: {}", self.metrics.addr),
            ));
        }

        Ok(())
    }
}
