//! Exchange-specific half of the WebSocket transport.

use crate::error::SourceResult;
use crate::subscription::RequestIdGenerator;
use async_trait::async_trait;
use obsync_core::{MarketId, Price, SnapshotEvent, StreamEvent};
use std::collections::HashMap;

/// Exchange-specific request builders, frame parser and REST calls.
///
/// [`ConnectionManager`](crate::ConnectionManager) owns the socket and
/// calls into the adapter for everything that depends on the exchange's
/// wire format.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Text frames that subscribe `market` to its diff, snapshot and trade channels.
    fn subscribe_requests(
        &self,
        market: &MarketId,
        ids: &RequestIdGenerator,
    ) -> SourceResult<Vec<String>>;

    fn unsubscribe_requests(
        &self,
        market: &MarketId,
        ids: &RequestIdGenerator,
    ) -> SourceResult<Vec<String>>;

    /// Application-level ping. `None` means use a WebSocket ping frame.
    fn ping_request(&self, ids: &RequestIdGenerator) -> Option<String>;

    /// Decode one text frame. Acks, pongs and other control frames decode
    /// to an empty list.
    fn parse_message(&self, text: &str) -> SourceResult<Vec<StreamEvent>>;

    async fn fetch_snapshot(&self, market: &MarketId) -> SourceResult<SnapshotEvent>;

    async fn fetch_last_traded_prices(
        &self,
        markets: &[MarketId],
    ) -> SourceResult<HashMap<MarketId, Price>>;
}
