//! Per-market order book state for the synchronization engine.
//!
//! `MarketBook` holds the materialized bid/ask levels of one market and
//! reconciles snapshots with diffs. `RecentDiffWindow` and
//! `PendingEventBuffer` are the bounded per-market histories the tracker
//! uses around it.

pub mod book;
pub mod error;
pub mod pending;
pub mod window;

pub use book::{BookSnapshot, MarketBook, SharedBook, StalenessPolicy};
pub use error::{BookError, BookResult};
pub use pending::PendingEventBuffer;
pub use window::RecentDiffWindow;
