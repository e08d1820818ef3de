//! Order book tracker.
//!
//! Keeps one consistent book per market from unordered snapshot, diff and
//! trade streams, while markets are added and removed at runtime.
//!
//! ```text
//! MarketDataSource ─┬─ diffs ─────► diff router ─────┐
//!                   ├─ snapshots ─► snapshot router ─┼─► per-market queue ─► worker ─► MarketBook
//!                   └─ trades ────► trade router ────┴──────────────────────────────► (trade fields)
//! ```

pub mod config;
pub mod error;
pub mod ready;
pub mod tracker;

mod fallback;
mod router;
mod slot;
mod supervisor;
mod worker;

pub use config::{TradeRefreshConfig, TrackerConfig};
pub use error::{TrackerError, TrackerResult};
pub use ready::ReadySignal;
pub use router::RouteOutcome;
pub use tracker::Tracker;
