//! The contract every exchange data source implements.

use crate::error::SourceResult;
use async_trait::async_trait;
use obsync_core::{DiffEvent, MarketId, Price, SnapshotEvent, TradeEvent};
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Per-exchange producer of book events.
///
/// The `listen_for_*` methods are long-lived producers. They retry their own
/// transport failures internally and only return:
/// - `Ok(())` when the stream has ended for good,
/// - `Err(e)` with `e.is_fatal()` when it can never produce again,
/// - any other `Err` for failures the caller may retry after a backoff.
///
/// Callers cancel a listener by dropping its future, so implementations
/// must keep their state consistent at every await point.
#[async_trait]
pub trait MarketDataSource: Send + Sync + 'static {
    /// REST fallback for last traded prices. Markets without a price are omitted.
    async fn get_last_traded_prices(
        &self,
        markets: &[MarketId],
    ) -> SourceResult<HashMap<MarketId, Price>>;

    /// Full book of one market at a known sequence.
    async fn get_initial_book(&self, market: &MarketId) -> SourceResult<SnapshotEvent>;

    async fn listen_for_diffs(&self, output: mpsc::UnboundedSender<DiffEvent>) -> SourceResult<()>;

    async fn listen_for_snapshots(
        &self,
        output: mpsc::UnboundedSender<SnapshotEvent>,
    ) -> SourceResult<()>;

    async fn listen_for_trades(&self, output: mpsc::UnboundedSender<TradeEvent>) -> SourceResult<()>;

    /// Own the transport connection(s): connect, reconnect with bounded
    /// backoff and re-subscribe every registered market.
    async fn listen_for_subscriptions(&self) -> SourceResult<()>;

    /// Start streaming a market on the shared transport. False on failure.
    async fn subscribe_to_market(&self, market: &MarketId) -> bool;

    /// Stop streaming a market. False on failure.
    async fn unsubscribe_from_market(&self, market: &MarketId) -> bool;
}
