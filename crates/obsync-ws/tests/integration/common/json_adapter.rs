//! Exchange adapter speaking plain `StreamEvent` JSON.

use async_trait::async_trait;
use obsync_core::{MarketId, Price, SnapshotEvent, StreamEvent};
use obsync_ws::{ExchangeAdapter, RequestIdGenerator, SourceError, SourceResult};
use serde_json::json;
use std::collections::HashMap;

/// Subscribe frames: `{"op":"subscribe","market":..,"id":..}`.
/// Data frames: one tagged `StreamEvent` each. Anything with an `op` field
/// is treated as a control frame.
pub struct JsonAdapter {
    /// Use an application-level ping instead of a WebSocket ping frame.
    pub app_ping: bool,
}

impl JsonAdapter {
    pub fn new() -> Self {
        Self { app_ping: false }
    }
}

#[async_trait]
impl ExchangeAdapter for JsonAdapter {
    fn name(&self) -> &str {
        "json"
    }

    fn subscribe_requests(
        &self,
        market: &MarketId,
        ids: &RequestIdGenerator,
    ) -> SourceResult<Vec<String>> {
        Ok(vec![json!({"op": "subscribe", "market": market, "id": ids.next_id()}).to_string()])
    }

    fn unsubscribe_requests(
        &self,
        market: &MarketId,
        ids: &RequestIdGenerator,
    ) -> SourceResult<Vec<String>> {
        Ok(vec![json!({"op": "unsubscribe", "market": market, "id": ids.next_id()}).to_string()])
    }

    fn ping_request(&self, ids: &RequestIdGenerator) -> Option<String> {
        self.app_ping
            .then(|| json!({"op": "ping", "id": ids.next_id()}).to_string())
    }

    fn parse_message(&self, text: &str) -> SourceResult<Vec<StreamEvent>> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        if value.get("op").is_some() {
            return Ok(Vec::new());
        }
        Ok(vec![serde_json::from_value(value)?])
    }

    async fn fetch_snapshot(&self, market: &MarketId) -> SourceResult<SnapshotEvent> {
        Err(SourceError::UnknownMarket(market.clone()))
    }

    async fn fetch_last_traded_prices(
        &self,
        _markets: &[MarketId],
    ) -> SourceResult<HashMap<MarketId, Price>> {
        Ok(HashMap::new())
    }
}
