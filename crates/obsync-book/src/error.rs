//! Book error types.

use obsync_core::{MarketId, SequenceId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BookError {
    #[error("Invalid level in {market} at sequence {sequence}: {reason}")]
    InvalidLevel {
        market: MarketId,
        sequence: SequenceId,
        reason: String,
    },

    #[error("Snapshot for {got} applied to book of {expected}")]
    MarketMismatch { expected: MarketId, got: MarketId },
}

pub type BookResult<T> = Result<T, BookError>;
