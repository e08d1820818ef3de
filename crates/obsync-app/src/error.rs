//! Errors surfaced by the `obsync` binary and its replay harness.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// Config file unreadable, malformed, or failing validation.
    #[error("invalid app config: {0}")]
    Config(String),

    #[error("replay feed line {line}: {message}")]
    Replay { line: usize, message: String },

    #[error(transparent)]
    Tracker(#[from] obsync_tracker::TrackerError),

    #[error(transparent)]
    Telemetry(#[from] obsync_telemetry::TelemetryError),

    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
