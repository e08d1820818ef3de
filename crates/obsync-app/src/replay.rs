//! Recorded feed as a market data source.
//!
//! The feed is newline-delimited JSON, one `StreamEvent` per line. Blank
//! lines and lines starting with `#` are skipped. The first snapshot of a
//! market in the file is its initial book.

use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use obsync_core::{DiffEvent, MarketId, Price, SnapshotEvent, StreamEvent, TradeEvent};
use obsync_ws::{EventFanout, MarketDataSource, SourceError, SourceResult, SubscriptionRegistry};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct ReplayDataSource {
    events: Vec<StreamEvent>,
    initial_books: HashMap<MarketId, SnapshotEvent>,
    last_prices: Mutex<HashMap<MarketId, Price>>,
    subscriptions: SubscriptionRegistry,
    fanout: EventFanout,
    pace: Duration,
    started: AtomicBool,
    finished: CancellationToken,
}

impl ReplayDataSource {
    pub fn from_file(
        path: impl AsRef<Path>,
        pace: Duration,
        markets: impl IntoIterator<Item = MarketId>,
    ) -> AppResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read replay feed {}: {e}", path.display()))
        })?;
        let source = Self::from_ndjson(&content, pace, markets)?;
        info!(
            path = %path.display(),
            events = source.events.len(),
            markets = source.initial_books.len(),
            "Loaded replay feed"
        );
        Ok(source)
    }

    /// `markets` start out subscribed.
    pub fn from_ndjson(
        content: &str,
        pace: Duration,
        markets: impl IntoIterator<Item = MarketId>,
    ) -> AppResult<Self> {
        let mut events = Vec::new();
        let mut initial_books = HashMap::new();

        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let event = StreamEvent::from_json(line).map_err(|e| AppError::Replay {
                line: index + 1,
                message: e.to_string(),
            })?;
            if let StreamEvent::Snapshot(snapshot) = &event {
                initial_books
                    .entry(snapshot.market.clone())
                    .or_insert_with(|| snapshot.clone());
            }
            events.push(event);
        }

        let subscriptions = SubscriptionRegistry::new();
        for market in markets {
            subscriptions.add(market);
        }

        Ok(Self {
            events,
            initial_books,
            last_prices: Mutex::new(HashMap::new()),
            subscriptions,
            fanout: EventFanout::new(),
            pace,
            started: AtomicBool::new(false),
            finished: CancellationToken::new(),
        })
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Markets with an initial book in the feed.
    pub fn markets(&self) -> BTreeSet<MarketId> {
        self.initial_books.keys().cloned().collect()
    }

    pub fn is_subscribed(&self, market: &MarketId) -> bool {
        self.subscriptions.contains(market)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_cancelled()
    }

    /// Resolve once every event has been replayed.
    pub async fn wait_finished(&self) {
        self.finished.cancelled().await;
    }

    async fn play(&self) {
        let mut delivered = 0usize;
        let mut skipped = 0usize;

        for event in &self.events {
            if let StreamEvent::Trade(trade) = event {
                self.last_prices.lock().insert(trade.market.clone(), trade.price);
            }

            if self.subscriptions.contains(event.market()) {
                self.fanout.dispatch(event.clone());
                delivered += 1;
            } else {
                skipped += 1;
            }

            if self.pace.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(self.pace).await;
            }
        }

        info!(delivered, skipped, "Replay finished");
        self.finished.cancel();
    }
}

#[async_trait]
impl MarketDataSource for ReplayDataSource {
    async fn get_last_traded_prices(
        &self,
        markets: &[MarketId],
    ) -> SourceResult<HashMap<MarketId, Price>> {
        let prices = self.last_prices.lock();
        Ok(markets
            .iter()
            .filter_map(|market| prices.get(market).map(|price| (market.clone(), *price)))
            .collect())
    }

    async fn get_initial_book(&self, market: &MarketId) -> SourceResult<SnapshotEvent> {
        self.initial_books
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

    /// Plays the feed once.
    async fn listen_for_subscriptions(&self) -> SourceResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Replay already played");
            return Ok(());
        }
        info!(events = self.events.len(), pace_ms = self.pace.as_millis() as u64, "Starting replay");
        self.play().await;
        Ok(())
    }

    async fn subscribe_to_market(&self, market: &MarketId) -> bool {
        if self.subscriptions.add(market.clone()) {
            debug!(market = %market, "Subscribed");
        }
        true
    }

    async fn unsubscribe_from_market(&self, market: &MarketId) -> bool {
        if self.subscriptions.remove(market) {
            debug!(market = %market, "Unsubscribed");
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obsync_core::Size;
    use rust_decimal_macros::dec;

    const FEED: &str = r#"
# recorded 2024-05-01
{"type":"snapshot","market":"BTC-USD","sequence":6,"bids":[{"price":"100","size":"1"}],"asks":[{"price":"101","size":"2"}]}
{"type":"diff","market":"BTC-USD","sequence":7,"bids":[{"price":"99","size":"3"}],"asks":[]}
{"type":"diff","market":"ETH-USD","sequence":2,"bids":[{"price":"2000","size":"1"}],"asks":[]}
{"type":"trade","market":"BTC-USD","trade_id":"t-1","price":"100.5","amount":"0.1","side":"buy"}
{"type":"snapshot","market":"BTC-USD","sequence":9,"bids":[],"asks":[]}
{"type":"trade","market":"BTC-USD","trade_id":"t-2","price":"100.75","amount":"0.2","side":"sell"}
"#;

    fn btc() -> MarketId {
        MarketId::from("BTC-USD")
    }

    #[test]
    fn test_initial_book_is_first_snapshot() {
        let source = ReplayDataSource::from_ndjson(FEED, Duration::ZERO, [btc()]).unwrap();
        assert_eq!(source.event_count(), 6);
        assert_eq!(source.markets(), BTreeSet::from([btc()]));

        let book = tokio_test::block_on(source.get_initial_book(&btc())).unwrap();
        assert_eq!(book.sequence, 6);
        assert_eq!(book.bids[0].size, Size::new(dec!(1)));

        let missing = tokio_test::block_on(source.get_initial_book(&MarketId::from("ETH-USD")));
        assert!(matches!(missing, Err(SourceError::UnknownMarket(_))));
    }

    #[test]
    fn test_bad_line_reports_line_number() {
        let feed = "{\"type\":\"snapshot\",\"market\":\"X\",\"sequence\":1}\nnot json\n";
        let err = ReplayDataSource::from_ndjson(feed, Duration::ZERO, []).err().unwrap();
        assert!(matches!(err, AppError::Replay { line: 2, .. }));
    }

    #[tokio::test]
    async fn test_replay_only_streams_subscribed_markets() {
        let source = ReplayDataSource::from_ndjson(FEED, Duration::ZERO, [btc()]).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        // Events stay buffered until a listener forwards them.
        source.listen_for_subscriptions().await.unwrap();
        assert!(source.is_finished());

        tokio::select! {
            _ = source.listen_for_diffs(tx) => panic!("forwarder should not return"),
            () = tokio::time::sleep(Duration::from_millis(50)) => {}
        }

        let diff = rx.try_recv().unwrap();
        assert_eq!(diff.market, btc());
        assert_eq!(diff.sequence, 7);
        assert!(rx.try_recv().is_err(), "ETH-USD diff must be skipped");
    }

    #[tokio::test]
    async fn test_last_traded_prices_follow_replay() {
        let source = ReplayDataSource::from_ndjson(FEED, Duration::ZERO, []).unwrap();
        let markets = [btc(), MarketId::from("ETH-USD")];

        assert!(source.get_last_traded_prices(&markets).await.unwrap().is_empty());
        source.listen_for_subscriptions().await.unwrap();

        let prices = source.get_last_traded_prices(&markets).await.unwrap();
        assert_eq!(prices.len(), 1);
        assert_eq!(prices[&btc()], Price::new(dec!(100.75)));
    }

    #[tokio::test]
    async fn test_subscription_changes() {
        let source = ReplayDataSource::from_ndjson(FEED, Duration::ZERO, []).unwrap();
        let eth = MarketId::from("ETH-USD");

        assert!(source.subscribe_to_market(&eth).await);
        assert!(source.is_subscribed(&eth));
        assert!(source.unsubscribe_from_market(&eth).await);
        assert!(!source.is_subscribed(&eth));
    }

    #[tokio::test]
    async fn test_replay_plays_once() {
        let source = ReplayDataSource::from_ndjson(FEED, Duration::ZERO, [btc()]).unwrap();
        source.listen_for_subscriptions().await.unwrap();
        tokio::time::timeout(Duration::from_millis(100), source.listen_for_subscriptions())
            .await
            .unwrap()
            .unwrap();
    }
}
