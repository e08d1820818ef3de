//! Replay application integration tests.
//!
//! Runs the full binary pipeline against a small recorded feed:
//! - Startup over the configured markets
//! - Scheduled runtime add
//! - Shutdown at the end of the replay or on signal

use obsync_app::config::{ReplayConfig, ScheduleAction, ScheduledAction};
use obsync_app::{AppConfig, AppError, Application};
use obsync_core::{MarketId, Price, PriceLevel, Size};
use obsync_tracker::{TradeRefreshConfig, TrackerConfig};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::time::timeout;

const FEED: &str = r#"{"type":"snapshot","market":"BTC-USD","sequence":10,"bids":[{"price":"100","size":"1"}],"asks":[{"price":"101","size":"1"}]}
{"type":"snapshot","market":"ETH-USD","sequence":50,"bids":[{"price":"2000","size":"1"}],"asks":[{"price":"2001","size":"1"}]}
{"type":"diff","market":"BTC-USD","sequence":11,"bids":[{"price":"99","size":"2"}],"asks":[]}
{"type":"diff","market":"BTC-USD","sequence":9,"bids":[{"price":"100","size":"0"}],"asks":[]}
{"type":"trade","market":"BTC-USD","trade_id":"t-1","price":"100.5","amount":"0.1","side":"buy"}
{"type":"diff","market":"BTC-USD","sequence":12,"bids":[],"asks":[{"price":"101","size":"0"},{"price":"102","size":"3"}]}
{"type":"diff","market":"ETH-USD","sequence":51,"bids":[{"price":"1999","size":"4"}],"asks":[]}
{"type":"diff","market":"BTC-USD","sequence":13,"bids":[{"price":"98","size":"1"}],"asks":[]}
"#;

fn btc() -> MarketId {
    MarketId::from("BTC-USD")
}

fn eth() -> MarketId {
    MarketId::from("ETH-USD")
}

fn level(price: Decimal, size: Decimal) -> PriceLevel {
    PriceLevel::new(Price::new(price), Size::new(size))
}

fn feed_file() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(FEED.as_bytes()).unwrap();
    file
}

fn config(path: PathBuf, pace_ms: u64) -> AppConfig {
    AppConfig {
        tracker: TrackerConfig {
            markets: vec![btc()],
            init_delay_ms: 0,
            trade_refresh: TradeRefreshConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        },
        replay: ReplayConfig {
            path,
            pace_ms,
            drain_ms: 100,
        },
        schedule: vec![ScheduledAction {
            at_ms: 0,
            action: ScheduleAction::Add,
            market: eth(),
        }],
        report_interval_ms: 50,
        report_depth: 3,
    }
}

#[tokio::test]
async fn test_replay_builds_books_for_configured_and_added_markets() {
    let feed = feed_file();
    let app = Application::new(config(feed.path().to_path_buf(), 30)).unwrap();
    let tracker = app.tracker().clone();

    let summary = timeout(
        Duration::from_secs(10),
        app.run_until(tokio::time::sleep(Duration::from_secs(30))),
    )
    .await
    .expect("replay should finish on its own")
    .unwrap();

    assert_eq!(summary.completed_actions, 1);

    let btc_book = &summary.books[&btc()];
    assert_eq!(btc_book.snapshot_sequence, 10);
    assert_eq!(btc_book.last_diff_sequence, Some(13));
    assert_eq!(
        btc_book.bids,
        vec![
            level(dec!(100), dec!(1)),
            level(dec!(99), dec!(2)),
            level(dec!(98), dec!(1)),
        ]
    );
    assert_eq!(btc_book.asks, vec![level(dec!(102), dec!(3))]);
    assert_eq!(btc_book.last_trade_price, Some(Price::new(dec!(100.5))));

    let eth_book = &summary.books[&eth()];
    assert_eq!(eth_book.snapshot_sequence, 50);
    assert_eq!(
        eth_book.bids,
        vec![level(dec!(2000), dec!(1)), level(dec!(1999), dec!(4))]
    );

    assert!(summary.metrics.total_diffs_rejected >= 1);
    assert_eq!(summary.metrics.total_trades_processed, 1);

    assert!(!tracker.is_running());
    assert!(tracker.tracked_markets().is_empty());
}

#[tokio::test]
async fn test_shutdown_signal_stops_replay() {
    let feed = feed_file();
    let mut cfg = config(feed.path().to_path_buf(), 1000);
    cfg.schedule.clear();
    let app = Application::new(cfg).unwrap();
    let tracker = app.tracker().clone();

    let summary = timeout(
        Duration::from_secs(3),
        app.run_until(tokio::time::sleep(Duration::from_millis(100))),
    )
    .await
    .expect("shutdown signal should stop the application")
    .unwrap();

    assert_eq!(summary.completed_actions, 0);
    assert!(summary.books.contains_key(&btc()));
    assert!(!summary.books.contains_key(&eth()));
    assert!(!tracker.is_running());
    assert!(!tracker.is_ready());
}

#[tokio::test]
async fn test_missing_feed_is_a_config_error() {
    let cfg = config(PathBuf::from("/nonexistent/feed.ndjson"), 10);
    assert!(matches!(Application::new(cfg), Err(AppError::Config(_))));
}
