//! Failures from the logging and metrics layers.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The global tracing subscriber could not be installed.
    #[error("cannot install log subscriber: {0}")]
    LoggingInit(String),

    #[error("metrics export failed: {0}")]
    Metrics(String),

    /// Collector registration or gathering rejected by the registry.
    #[error("prometheus registry: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("metrics snapshot encoding: {0}")]
    Json(#[from] serde_json::Error),
}

pub type TelemetryResult<T> = Result<T, TelemetryError>;
