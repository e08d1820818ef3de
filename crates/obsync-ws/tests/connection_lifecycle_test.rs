//! WebSocket transport lifecycle integration tests.
//!
//! Tests the connection lifecycle:
//! - Subscription of registered markets on connect and reconnect
//! - Dynamic subscribe/unsubscribe
//! - Event fan-out to listeners
//! - Keep-alive pings

mod integration;
use integration::common::json_adapter::JsonAdapter;
use integration::common::mock_ws::MockWsServer;

use obsync_core::MarketId;
use obsync_ws::{ConnectionConfig, ConnectionState, MarketDataSource, WsMarketDataSource};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

fn config(url: String) -> ConnectionConfig {
    ConnectionConfig {
        url,
        reconnect_base_delay_ms: 50,
        reconnect_max_delay_ms: 100,
        ..Default::default()
    }
}

async fn wait_until<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    timeout(Duration::from_secs(3), async {
        loop {
            if condition().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .is_ok()
}

fn subscribe_frames(messages: &[String], market: &str) -> usize {
    messages
        .iter()
        .filter(|m| m.contains("\"subscribe\"") && m.contains(market))
        .count()
}

/// Registered markets are subscribed as soon as the connection is up.
#[tokio::test]
async fn test_registered_markets_subscribed_on_connect() {
    let server = MockWsServer::start().await;
    let source = Arc::new(WsMarketDataSource::new(
        config(server.url()),
        JsonAdapter::new(),
        [MarketId::from("BTC-USD"), MarketId::from("ETH-USD")],
    ));

    let runner = source.clone();
    let handle = tokio::spawn(async move { runner.listen_for_subscriptions().await });

    let subscribed = wait_until(|| async {
        let messages = server.received_messages().await;
        subscribe_frames(&messages, "BTC-USD") == 1 && subscribe_frames(&messages, "ETH-USD") == 1
    })
    .await;
    assert!(subscribed, "Both markets should be subscribed");

    source.shutdown();
    let result = timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    assert!(result.is_ok(), "Shutdown should end the connection loop cleanly");
    server.shutdown().await;
}

/// Subscribe fails while disconnected and succeeds on the live connection.
#[tokio::test]
async fn test_dynamic_subscribe_and_unsubscribe() {
    let server = MockWsServer::start().await;
    let source = Arc::new(WsMarketDataSource::new(
        config(server.url()),
        JsonAdapter::new(),
        Vec::new(),
    ));
    let sol = MarketId::from("SOL-USD");

    assert!(!source.subscribe_to_market(&sol).await, "Not connected yet");
    assert!(!source.connection().registry().contains(&sol));

    let runner = source.clone();
    let handle = tokio::spawn(async move { runner.listen_for_subscriptions().await });
    assert!(wait_until(|| async { source.connection().state() == ConnectionState::Connected }).await);

    assert!(source.subscribe_to_market(&sol).await);
    assert!(source.connection().registry().contains(&sol));
    assert!(wait_until(|| async { subscribe_frames(&server.received_messages().await, "SOL-USD") == 1 }).await);

    assert!(source.unsubscribe_from_market(&sol).await);
    assert!(!source.connection().registry().contains(&sol));
    let unsubscribed = wait_until(|| async {
        server
            .received_messages()
            .await
            .iter()
            .any(|m| m.contains("\"unsubscribe\"") && m.contains("SOL-USD"))
    })
    .await;
    assert!(unsubscribed);

    source.shutdown();
    let _ = timeout(Duration::from_secs(2), handle).await;
    server.shutdown().await;
}

/// A subscribe issued while the registry is being replayed is sent once.
#[tokio::test]
async fn test_subscribe_during_resubscribe_not_duplicated() {
    let server = MockWsServer::start().await;
    let source = Arc::new(WsMarketDataSource::new(
        ConnectionConfig {
            resubscribe_delay_ms: 300,
            ..config(server.url())
        },
        JsonAdapter::new(),
        [MarketId::from("BTC-USD")],
    ));
    let sol = MarketId::from("SOL-USD");

    let runner = source.clone();
    let handle = tokio::spawn(async move { runner.listen_for_subscriptions().await });
    assert!(wait_until(|| async { source.connection().state() == ConnectionState::Connected }).await);

    // Still inside the resubscribe delay: the frame is only queued.
    assert!(source.subscribe_to_market(&sol).await);
    assert!(subscribe_frames(&server.received_messages().await, "SOL-USD") == 0);

    assert!(wait_until(|| async { subscribe_frames(&server.received_messages().await, "BTC-USD") == 1 }).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    let messages = server.received_messages().await;
    assert_eq!(subscribe_frames(&messages, "SOL-USD"), 1);
    assert_eq!(subscribe_frames(&messages, "BTC-USD"), 1);

    source.shutdown();
    let _ = timeout(Duration::from_secs(2), handle).await;
    server.shutdown().await;
}

/// After the server drops the connection, the manager reconnects and
/// re-subscribes every registered market.
#[tokio::test]
async fn test_reconnect_resubscribes() {
    let server = MockWsServer::start().await;
    let source = Arc::new(WsMarketDataSource::new(
        config(server.url()),
        JsonAdapter::new(),
        [MarketId::from("BTC-USD")],
    ));

    let runner = source.clone();
    let handle = tokio::spawn(async move { runner.listen_for_subscriptions().await });
    assert!(wait_until(|| async { subscribe_frames(&server.received_messages().await, "BTC-USD") == 1 }).await);

    server.disconnect_all();

    let resubscribed = wait_until(|| async {
        server.connection_count().await >= 2
            && subscribe_frames(&server.received_messages().await, "BTC-USD") >= 2
    })
    .await;
    assert!(resubscribed, "Market should be re-subscribed after reconnect");
    assert!(source.connection().connection_count() >= 2);

    source.shutdown();
    let _ = timeout(Duration::from_secs(2), handle).await;
    server.shutdown().await;
}

/// Pushed data frames reach the matching listener output.
#[tokio::test]
async fn test_events_fan_out_to_listeners() {
    let server = MockWsServer::start().await;
    let source = Arc::new(WsMarketDataSource::new(
        config(server.url()),
        JsonAdapter::new(),
        [MarketId::from("BTC-USD")],
    ));

    let runner = source.clone();
    let handle = tokio::spawn(async move { runner.listen_for_subscriptions().await });
    assert!(wait_until(|| async { source.connection().state() == ConnectionState::Connected }).await);

    let (diff_tx, mut diff_rx) = mpsc::unbounded_channel();
    let (trade_tx, mut trade_rx) = mpsc::unbounded_channel();
    let diffs = {
        let source = source.clone();
        tokio::spawn(async move { source.listen_for_diffs(diff_tx).await })
    };
    let trades = {
        let source = source.clone();
        tokio::spawn(async move { source.listen_for_trades(trade_tx).await })
    };

    server.push(r#"{"op":"ack","id":1}"#);
    server.push(r#"{"type":"diff","market":"BTC-USD","sequence":11,"bids":[{"price":"100","size":"2"}],"asks":[]}"#);
    server.push(r#"{"type":"trade","market":"BTC-USD","trade_id":"t1","price":"100.5","amount":"0.1","side":"buy"}"#);
    server.push("not json");

    let diff = timeout(Duration::from_secs(2), diff_rx.recv()).await.unwrap().unwrap();
    assert_eq!(diff.sequence, 11);
    let trade = timeout(Duration::from_secs(2), trade_rx.recv()).await.unwrap().unwrap();
    assert_eq!(trade.trade_id, "t1");

    // Undecodable frames do not drop the connection
    assert_eq!(source.connection().state(), ConnectionState::Connected);

    diffs.abort();
    trades.abort();
    source.shutdown();
    let _ = timeout(Duration::from_secs(2), handle).await;
    server.shutdown().await;
}

/// An idle connection gets a keep-alive ping instead of being dropped.
#[tokio::test]
async fn test_idle_connection_sends_ping() {
    let server = MockWsServer::start().await;
    let source = Arc::new(WsMarketDataSource::new(
        ConnectionConfig {
            ping_interval_ms: 100,
            pong_timeout_ms: 1000,
            ..config(server.url())
        },
        JsonAdapter::new(),
        Vec::new(),
    ));

    let runner = source.clone();
    let handle = tokio::spawn(async move { runner.listen_for_subscriptions().await });

    assert!(wait_until(|| async { server.ping_count().await >= 1 }).await, "Ping expected");
    // The mock answers pings, so the first connection survives
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(server.connection_count().await, 1);

    source.shutdown();
    let _ = timeout(Duration::from_secs(2), handle).await;
    server.shutdown().await;
}

/// A configured attempt limit ends the loop with a fatal error.
#[tokio::test]
async fn test_reconnect_limit_is_fatal() {
    // Bind then drop to get a port with no listener
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);

    let source = WsMarketDataSource::new(
        ConnectionConfig {
            max_reconnect_attempts: 2,
            ..config(url)
        },
        JsonAdapter::new(),
        Vec::new(),
    );

    let result = timeout(Duration::from_secs(3), source.listen_for_subscriptions())
        .await
        .unwrap();
    let err = result.unwrap_err();
    assert!(err.is_fatal());
}
