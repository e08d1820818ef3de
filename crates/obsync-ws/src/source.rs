//! `MarketDataSource` over a shared WebSocket connection.

use crate::adapter::ExchangeAdapter;
use crate::connection::{ConnectionConfig, ConnectionManager};
use crate::data_source::MarketDataSource;
use crate::error::SourceResult;
use crate::fanout::EventFanout;
use async_trait::async_trait;
use obsync_core::{DiffEvent, MarketId, Price, SnapshotEvent, TradeEvent};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Data source built from an [`ExchangeAdapter`] and one shared connection.
pub struct WsMarketDataSource<A: ExchangeAdapter> {
    adapter: Arc<A>,
    connection: Arc<ConnectionManager<A>>,
    fanout: Arc<EventFanout>,
}

impl<A: ExchangeAdapter> WsMarketDataSource<A> {
    /// `markets` are subscribed on the first connect.
    pub fn new(config: ConnectionConfig, adapter: A, markets: impl IntoIterator<Item = MarketId>) -> Self {
        let adapter = Arc::new(adapter);
        let fanout = Arc::new(EventFanout::new());
        let connection = Arc::new(ConnectionManager::new(config, adapter.clone(), fanout.clone()));
        for market in markets {
            connection.register(market);
        }
        Self {
            adapter,
            connection,
            fanout,
        }
    }

    pub fn connection(&self) -> &Arc<ConnectionManager<A>> {
        &self.connection
    }

    pub fn shutdown(&self) {
        self.connection.shutdown();
    }
}

#[async_trait]
impl<A: ExchangeAdapter> MarketDataSource for WsMarketDataSource<A> {
    async fn get_last_traded_prices(
        &self,
        markets: &[MarketId],
    ) -> SourceResult<HashMap<MarketId, Price>> {
        self.adapter.fetch_last_traded_prices(markets).await
    }

    async fn get_initial_book(&self, market: &MarketId) -> SourceResult<SnapshotEvent> {
        self.adapter.fetch_snapshot(market).await
    }

    async fn listen_for_diffs(&self, output: mpsc::UnboundedSender<DiffEvent>) -> SourceResult<()> {
        self.fanout.forward_diffs(output).await
    }

    async fn listen_for_snapshots(
        &self,
        output: mpsc::UnboundedSender<SnapshotEvent>,
    ) -> SourceResult<()> {
        self.fanout.forward_snapshots(output).await
    }

    async fn listen_for_trades(&self, output: mpsc::UnboundedSender<TradeEvent>) -> SourceResult<()> {
        self.fanout.forward_trades(output).await
    }

    async fn listen_for_subscriptions(&self) -> SourceResult<()> {
        self.connection.run().await
    }

    async fn subscribe_to_market(&self, market: &MarketId) -> bool {
        self.connection.subscribe(market)
    }

    async fn unsubscribe_from_market(&self, market: &MarketId) -> bool {
        self.connection.unsubscribe(market)
    }
}
