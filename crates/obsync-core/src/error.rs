//! Errors raised while building or decoding core values.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Market identifiers must be non-blank.
    #[error("market id {0} is blank")]
    InvalidMarketId(String),

    #[error("bad decimal literal: {0}")]
    DecimalParse(#[from] rust_decimal::Error),

    /// A feed line was not a recognised `StreamEvent`.
    #[error("could not decode stream event: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
