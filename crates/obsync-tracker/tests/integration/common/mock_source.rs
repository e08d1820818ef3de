//! Scripted in-memory data source.

use async_trait::async_trait;
use obsync_core::{DiffEvent, MarketId, Price, SnapshotEvent, StreamEvent, TradeEvent};
use obsync_ws::{EventFanout, MarketDataSource, SourceError, SourceResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    InitialBook(MarketId),
    Subscribe(MarketId),
    Unsubscribe(MarketId),
    LastTradedPrices(Vec<MarketId>),
}

pub struct MockDataSource {
    fanout: EventFanout,
    books: Mutex<HashMap<MarketId, SnapshotEvent>>,
    gates: Mutex<HashMap<MarketId, Arc<Notify>>>,
    subscribe_gates: Mutex<HashMap<MarketId, Arc<Notify>>>,
    book_failures: Mutex<HashMap<MarketId, u32>>,
    prices: Mutex<HashMap<MarketId, Price>>,
    subscribe_ok: AtomicBool,
    unsubscribe_ok: AtomicBool,
    calls: Mutex<Vec<Call>>,
}

impl Default for MockDataSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDataSource {
    pub fn new() -> Self {
        Self {
            fanout: EventFanout::new(),
            books: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            subscribe_gates: Mutex::new(HashMap::new()),
            book_failures: Mutex::new(HashMap::new()),
            prices: Mutex::new(HashMap::new()),
            subscribe_ok: AtomicBool::new(true),
            unsubscribe_ok: AtomicBool::new(true),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Book returned by `get_initial_book`.
    pub fn set_initial_book(&self, snapshot: SnapshotEvent) {
        self.books.lock().insert(snapshot.market.clone(), snapshot);
    }

    /// Hold `get_initial_book` for a market until the returned gate is notified.
    pub fn gate_initial_book(&self, market: &MarketId) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates.lock().insert(market.clone(), gate.clone());
        gate
    }

    /// Hold `subscribe_to_market` for a market until the gate is notified.
    pub fn gate_subscribe(&self, market: &MarketId) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.subscribe_gates.lock().insert(market.clone(), gate.clone());
        gate
    }

    /// Fail the next `count` initial book fetches of a market.
    pub fn fail_initial_book(&self, market: &MarketId, count: u32) {
        self.book_failures.lock().insert(market.clone(), count);
    }

    pub fn set_price(&self, market: &MarketId, price: Price) {
        self.prices.lock().insert(market.clone(), price);
    }

    pub fn set_subscribe_ok(&self, ok: bool) {
        self.subscribe_ok.store(ok, Ordering::SeqCst);
    }

    pub fn set_unsubscribe_ok(&self, ok: bool) {
        self.unsubscribe_ok.store(ok, Ordering::SeqCst);
    }

    /// Emit an event on the matching listener stream.
    pub fn push(&self, event: StreamEvent) {
        self.fanout.dispatch(event);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn called(&self, call: &Call) -> bool {
        self.calls.lock().contains(call)
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl MarketDataSource for MockDataSource {
    async fn get_last_traded_prices(
        &self,
        markets: &[MarketId],
    ) -> SourceResult<HashMap<MarketId, Price>> {
        self.record(Call::LastTradedPrices(markets.to_vec()));
        let prices = self.prices.lock();
        Ok(markets
            .iter()
            .filter_map(|m| prices.get(m).map(|p| (m.clone(), *p)))
            .collect())
    }

    async fn get_initial_book(&self, market: &MarketId) -> SourceResult<SnapshotEvent> {
        self.record(Call::InitialBook(market.clone()));

        let gate = self.gates.lock().remove(market);
        if let Some(gate) = gate {
            gate.notified().await;
        }

        {
            let mut failures = self.book_failures.lock();
            if let Some(remaining) = failures.get_mut(market) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(SourceError::Request(format!("injected failure for {market}")));
                }
            }
        }

        self.books
            .lock()
            .get(market)
            .cloned()
            .ok_or_else(|| SourceError::UnknownMarket(market.clone()))
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
        std::future::pending().await
    }

    async fn subscribe_to_market(&self, market: &MarketId) -> bool {
        self.record(Call::Subscribe(market.clone()));
        let gate = self.subscribe_gates.lock().remove(market);
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.subscribe_ok.load(Ordering::SeqCst)
    }

    async fn unsubscribe_from_market(&self, market: &MarketId) -> bool {
        self.record(Call::Unsubscribe(market.clone()));
        self.unsubscribe_ok.load(Ordering::SeqCst)
    }
}
