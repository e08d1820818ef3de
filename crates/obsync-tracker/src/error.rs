//! Tracker error types.

use obsync_book::BookError;
use obsync_core::MarketId;
use obsync_telemetry::TelemetryError;
use obsync_ws::SourceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Tracker already started")]
    AlreadyStarted,

    #[error("Market {0} is not initializing")]
    NotInitializing(MarketId),

    #[error("Book error: {0}")]
    Book(#[from] BookError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
}

pub type TrackerResult<T> = Result<T, TrackerError>;
