//! Core domain types for the order book synchronization engine.
//!
//! This crate provides fundamental types shared by every other crate:
//! - `MarketId`: Exchange trading pair identifier (e.g. "BTC-USD")
//! - `Price`, `Size`: Precision-safe numeric types
//! - `DiffEvent`, `SnapshotEvent`, `TradeEvent`: Immutable feed events
//! - `MarketPhase`: Per-market tracking lifecycle

pub mod decimal;
pub mod error;
pub mod event;
pub mod market;

pub use decimal::{Price, Size};
pub use error::{CoreError, Result};
pub use event::{
    BookMessage, DiffEvent, PriceLevel, SequenceId, SnapshotEvent, StreamEvent, TradeEvent,
    TradeSide,
};
pub use market::{MarketId, MarketPhase};
