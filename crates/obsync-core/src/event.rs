//! Feed events produced by market data sources.
//!
//! Events are immutable once produced: the tracker moves them through
//! its queues by value and never edits their contents.

use crate::decimal::{Price, Size};
use crate::error::Result;
use crate::market::MarketId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Monotonically increasing per-market update identifier.
pub type SequenceId = u64;

/// One price level delta or snapshot entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Price,
    /// Zero means "remove this level".
    pub size: Size,
}

impl PriceLevel {
    pub fn new(price: Price, size: Size) -> Self {
        Self { price, size }
    }
}

/// Incremental update to one or more price levels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffEvent {
    pub market: MarketId,
    pub sequence: SequenceId,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub bids: Vec<PriceLevel>,
    #[serde(default)]
    pub asks: Vec<PriceLevel>,
}

impl DiffEvent {
    pub fn new(
        market: MarketId,
        sequence: SequenceId,
        bids: Vec<PriceLevel>,
        asks: Vec<PriceLevel>,
    ) -> Self {
        Self {
            market,
            sequence,
            timestamp: Utc::now(),
            bids,
            asks,
        }
    }
}

/// Full replacement of a book's bid/ask state at a known sequence point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEvent {
    pub market: MarketId,
    pub sequence: SequenceId,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub bids: Vec<PriceLevel>,
    #[serde(default)]
    pub asks: Vec<PriceLevel>,
}

impl SnapshotEvent {
    pub fn new(
        market: MarketId,
        sequence: SequenceId,
        bids: Vec<PriceLevel>,
        asks: Vec<PriceLevel>,
    ) -> Self {
        Self {
            market,
            sequence,
            timestamp: Utc::now(),
            bids,
            asks,
        }
    }
}

/// Aggressor side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// Public trade print.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub market: MarketId,
    pub trade_id: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    pub price: Price,
    pub amount: Size,
    pub side: TradeSide,
}

impl TradeEvent {
    pub fn new(
        market: MarketId,
        trade_id: impl Into<String>,
        price: Price,
        amount: Size,
        side: TradeSide,
    ) -> Self {
        Self {
            market,
            trade_id: trade_id.into(),
            timestamp: Utc::now(),
            price,
            amount,
            side,
        }
    }
}

/// Any event a data source can emit.
///
/// Serialized with a `type` tag so recorded feeds can be stored as
/// newline-delimited JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Diff(DiffEvent),
    Snapshot(SnapshotEvent),
    Trade(TradeEvent),
}

impl StreamEvent {
    pub fn market(&self) -> &MarketId {
        match self {
            Self::Diff(e) => &e.market,
            Self::Snapshot(e) => &e.market,
            Self::Trade(e) => &e.market,
        }
    }

    /// Decode one JSON object (e.g. one line of a recorded feed).
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Item carried by a market's serial queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookMessage {
    Diff(DiffEvent),
    Snapshot(SnapshotEvent),
}

impl BookMessage {
    pub fn sequence(&self) -> SequenceId {
        match self {
            Self::Diff(d) => d.sequence,
            Self::Snapshot(s) => s.sequence,
        }
    }
}
