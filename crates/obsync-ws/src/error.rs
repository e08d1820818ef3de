//! Market data source error types.

use obsync_core::MarketId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed: code={code}, reason={reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("Reconnect attempts exhausted after {0} tries")]
    ReconnectExhausted(u32),

    #[error("Not connected")]
    NotConnected,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Heartbeat timeout")]
    HeartbeatTimeout,

    #[error("Message parse error: {0}")]
    Parse(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("No data for market {0}")]
    UnknownMarket(MarketId),

    #[error("Output for {0} stream closed")]
    OutputClosed(&'static str),

    #[error("Tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] obsync_core::CoreError),
}

impl SourceError {
    /// Unrecoverable for the stream that returned it; retrying cannot help.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ReconnectExhausted(_) | Self::OutputClosed(_)
        )
    }
}

pub type SourceResult<T> = Result<T, SourceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(SourceError::OutputClosed("diff").is_fatal());
        assert!(SourceError::ReconnectExhausted(3).is_fatal());
        assert!(!SourceError::HeartbeatTimeout.is_fatal());
        assert!(!SourceError::NotConnected.is_fatal());
        assert!(!SourceError::Request("503".to_string()).is_fatal());
    }
}
