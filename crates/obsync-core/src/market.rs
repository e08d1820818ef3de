//! Market identification and tracking lifecycle.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Exchange trading pair identifier (e.g. "BTC-USD").
///
/// Opaque to the synchronization core: it is only compared, hashed
/// and displayed. Exchange adapters own the mapping to their symbols.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarketId(String);

impl MarketId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Parse a user-supplied id, rejecting blank input.
    pub fn parse(id: &str) -> Result<Self> {
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(CoreError::InvalidMarketId(format!("{id:?}")));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MarketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MarketId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for MarketId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for MarketId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Tracking lifecycle of a single market.
///
/// `Unregistered -> Initializing -> Active -> Removed`. Only `Active`
/// markets accept live diffs, snapshots and trades into their serial
/// queue; `Initializing` markets buffer diffs; everything else drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketPhase {
    Unregistered,
    Initializing,
    Active,
    Removed,
}

impl MarketPhase {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Whether diffs for this market should be parked in the pending buffer.
    pub fn buffers_diffs(&self) -> bool {
        matches!(self, Self::Initializing)
    }
}

impl fmt::Display for MarketPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unregistered => write!(f, "UNREGISTERED"),
            Self::Initializing => write!(f, "INITIALIZING"),
            Self::Active => write!(f, "ACTIVE"),
            Self::Removed => write!(f, "REMOVED"),
        }
    }
}
