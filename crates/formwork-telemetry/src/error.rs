//! Telemetry error types.

use thiserror::Error;

/// Errors raised while installing logging or metrics.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The log filter could not be parsed, or a global subscriber was already set.
    #[error("failed to initialize logging: {0}")]
    LoggingInit(String),

    /// The Prometheus recorder could not be installed.
    #[error("failed to initialize metrics: {0}")]
    MetricsInit(String),

    /// A listen address did not parse.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}
