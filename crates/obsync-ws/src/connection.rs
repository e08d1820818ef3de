//! The single WebSocket link a feed adapter runs over.
//!
//! Every registered market rides the same socket. After each (re)connect
//! the full registry is re-subscribed; dropped links are retried with
//! capped exponential backoff.

use crate::adapter::ExchangeAdapter;
use crate::error::{SourceError, SourceResult};
use crate::fanout::EventFanout;
use crate::heartbeat::HeartbeatMonitor;
use crate::subscription::{RequestIdGenerator, SubscriptionRegistry};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use obsync_core::MarketId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio_tungstenite::{
    connect_async_tls_with_config, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

const OUTBOUND_CAPACITY: usize = 256;

fn default_reconnect_base_delay_ms() -> u64 {
    1000
}

fn default_reconnect_max_delay_ms() -> u64 {
    5000
}

fn default_ping_interval_ms() -> u64 {
    30000
}

fn default_pong_timeout_ms() -> u64 {
    10000
}

fn default_resubscribe_delay_ms() -> u64 {
    0
}

/// Endpoint and retry settings for one feed link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// `ws://` or `wss://` endpoint.
    pub url: String,
    /// Give up after this many failed attempts in a row; 0 retries forever.
    #[serde(default)]
    pub max_reconnect_attempts: u32,
    /// First retry delay; doubles per failed attempt.
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    /// Cap for exponential backoff.
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
    /// Send a ping after this long without any inbound frame.
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    /// Reconnect if nothing arrives this long after a ping.
    #[serde(default = "default_pong_timeout_ms")]
    pub pong_timeout_ms: u64,
    /// Pause between connect and re-subscription.
    #[serde(default = "default_resubscribe_delay_ms")]
    pub resubscribe_delay_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_reconnect_attempts: 0,
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            ping_interval_ms: default_ping_interval_ms(),
            pong_timeout_ms: default_pong_timeout_ms(),
            resubscribe_delay_ms: default_resubscribe_delay_ms(),
        }
    }
}

/// Where the link is in its connect/retry cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// One shared WebSocket connection carrying every registered market.
pub struct ConnectionManager<A: ExchangeAdapter> {
    config: ConnectionConfig,
    adapter: Arc<A>,
    state: RwLock<ConnectionState>,
    registry: SubscriptionRegistry,
    request_ids: RequestIdGenerator,
    heartbeat: HeartbeatMonitor,
    fanout: Arc<EventFanout>,
    reconnect_count: AtomicU32,
    connections: AtomicU32,
    /// Frames queued by subscribe/unsubscribe, written by the message loop.
    outbound_tx: mpsc::Sender<String>,
    outbound_rx: TokioMutex<mpsc::Receiver<String>>,
    shutdown_token: CancellationToken,
}

impl<A: ExchangeAdapter> ConnectionManager<A> {
    pub fn new(config: ConnectionConfig, adapter: Arc<A>, fanout: Arc<EventFanout>) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let heartbeat = HeartbeatMonitor::new(
            Duration::from_millis(config.ping_interval_ms),
            Duration::from_millis(config.pong_timeout_ms),
        );
        Self {
            config,
            adapter,
            state: RwLock::new(ConnectionState::Disconnected),
            registry: SubscriptionRegistry::new(),
            request_ids: RequestIdGenerator::new(),
            heartbeat,
            fanout,
            reconnect_count: AtomicU32::new(0),
            connections: AtomicU32::new(0),
            outbound_tx,
            outbound_rx: TokioMutex::new(outbound_rx),
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    fn set_state(&self, next: ConnectionState) {
        let prev = std::mem::replace(&mut *self.state.write(), next);
        if prev != next {
            debug!(from = ?prev, to = ?next, "Transport state change");
        }
    }

    /// Consecutive failed attempts since the last successful connect.
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_count.load(Ordering::Relaxed)
    }

    /// Successful connects so far.
    pub fn connection_count(&self) -> u32 {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Register a market to be subscribed on the next connect.
    pub fn register(&self, market: MarketId) {
        self.registry.add(market);
    }

    /// Subscribe a market on the live connection.
    ///
    /// False when not connected or the request cannot be built or queued;
    /// the market is then not registered.
    pub fn subscribe(&self, market: &MarketId) -> bool {
        if !self.is_connected() {
            warn!(market = %market, "Subscribe while disconnected");
            return false;
        }

        let requests = match self.adapter.subscribe_requests(market, &self.request_ids) {
            Ok(requests) => requests,
            Err(e) => {
                warn!(market = %market, error = %e, "Failed to build subscribe request");
                return false;
            }
        };

        let newly_added = self.registry.add(market.clone());
        if let Err(e) = self.queue_all(requests) {
            warn!(market = %market, error = %e, "Failed to queue subscribe request");
            if newly_added {
                self.registry.remove(market);
            }
            return false;
        }

        info!(market = %market, adapter = self.adapter.name(), "Subscribed");
        true
    }

    /// Unsubscribe a market. It is unregistered even when this returns false,
    /// so it is never re-subscribed.
    pub fn unsubscribe(&self, market: &MarketId) -> bool {
        let was_registered = self.registry.remove(market);

        if !self.is_connected() {
            warn!(market = %market, "Unsubscribe while disconnected");
            return false;
        }

        let result = self
            .adapter
            .unsubscribe_requests(market, &self.request_ids)
            .and_then(|requests| self.queue_all(requests));
        match result {
            Ok(()) => {
                info!(market = %market, was_registered, "Unsubscribed");
                true
            }
            Err(e) => {
                warn!(market = %market, error = %e, "Failed to unsubscribe");
                false
            }
        }
    }

    fn queue_all(&self, frames: Vec<String>) -> SourceResult<()> {
        for frame in frames {
            self.outbound_tx
                .try_send(frame)
                .map_err(|e| SourceError::SendFailed(e.to_string()))?;
        }
        Ok(())
    }

    /// Signal graceful shutdown of [`run`](Self::run).
    pub fn shutdown(&self) {
        info!(url = %self.config.url, "Transport stop requested");
        self.shutdown_token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Connect and keep the connection alive until shutdown.
    ///
    /// Returns `Ok(())` on shutdown and `ReconnectExhausted` once
    /// `max_reconnect_attempts` consecutive attempts have failed.
    pub async fn run(&self) -> SourceResult<()> {
        let mut attempt = 0u32;

        loop {
            if self.is_shutdown() {
                self.set_state(ConnectionState::Disconnected);
                return Ok(());
            }

            self.set_state(ConnectionState::Connecting);

            match self.try_connect(&mut attempt).await {
                Ok(()) => info!(url = %self.config.url, "WebSocket connection closed"),
                Err(e) => error!(url = %self.config.url, error = %e, "WebSocket connection error"),
            }

            if self.is_shutdown() {
                info!("Stopped while disconnected; no reconnect");
                self.set_state(ConnectionState::Disconnected);
                return Ok(());
            }

            attempt += 1;
            self.reconnect_count.store(attempt, Ordering::Relaxed);

            if self.config.max_reconnect_attempts > 0 && attempt >= self.config.max_reconnect_attempts
            {
                error!(attempt, limit = self.config.max_reconnect_attempts, "Giving up on reconnect");
                self.set_state(ConnectionState::Disconnected);
                return Err(SourceError::ReconnectExhausted(attempt));
            }

            self.set_state(ConnectionState::Reconnecting);

            let delay = self.backoff_delay(attempt);
            warn!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.shutdown_token.cancelled() => {
                    self.set_state(ConnectionState::Disconnected);
                    return Ok(());
                }
            }
        }
    }

    async fn try_connect(&self, attempt: &mut u32) -> SourceResult<()> {
        info!(url = %self.config.url, "Opening feed connection");

        let (socket, _) = connect_async_tls_with_config(&self.config.url, None, true, None).await?;
        let (mut write, mut read) = socket.split();

        self.set_state(ConnectionState::Connected);
        *attempt = 0;
        self.reconnect_count.store(0, Ordering::Relaxed);
        self.connections.fetch_add(1, Ordering::Relaxed);
        self.heartbeat.reset();
        info!(url = %self.config.url, "Feed connection open");

        if let Err(e) = self.restore_subscriptions(&mut write).await {
            self.set_state(ConnectionState::Disconnected);
            return Err(e);
        }

        let result = self.message_loop(&mut write, &mut read).await;
        self.set_state(ConnectionState::Disconnected);
        result
    }

    async fn restore_subscriptions(&self, write: &mut WsSink) -> SourceResult<()> {
        if self.config.resubscribe_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.resubscribe_delay_ms)).await;
        }

        // Queued frames predate this connect; the registry read below covers them.
        let dropped = self.discard_queued_frames().await;
        if dropped > 0 {
            debug!(dropped, "Discarded frames queued before resubscribe");
        }

        let markets = self.registry.markets();
        info!(count = markets.len(), "Restoring subscriptions");

        for market in &markets {
            for frame in self.adapter.subscribe_requests(market, &self.request_ids)? {
                write.send(Message::Text(frame)).await?;
            }
        }
        Ok(())
    }

    async fn discard_queued_frames(&self) -> usize {
        let mut outbound = self.outbound_rx.lock().await;
        let mut dropped = 0;
        while outbound.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }

    async fn message_loop(&self, write: &mut WsSink, read: &mut WsStream) -> SourceResult<()> {
        let check_interval = self.heartbeat.check_interval();

        loop {
            let outbound_recv = async { self.outbound_rx.lock().await.recv().await };

            tokio::select! {
                () = self.shutdown_token.cancelled() => {
                    debug!("Closing feed connection on stop");
                    if let Err(e) = write.send(Message::Close(None)).await {
                        warn!(error = %e, "Close frame not sent");
                    }
                    return Ok(());
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.heartbeat.record_message();
                            self.handle_text(&text);
                        }
                        Some(Ok(Message::Ping(data))) => {
                            self.heartbeat.record_message();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            self.heartbeat.record_message();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = match frame {
                                Some(f) => (u16::from(f.code), f.reason.into_owned()),
                                None => (1000, String::from("no close frame")),
                            };
                            warn!(code, %reason, "Feed closed by peer");
                            return Err(SourceError::ConnectionClosed { code, reason });
                        }
                        Some(Ok(_)) => {
                            self.heartbeat.record_message();
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            warn!("Feed stream ended without close");
                            return Ok(());
                        }
                    }
                }

                outbound = outbound_recv => {
                    if let Some(frame) = outbound {
                        write.send(Message::Text(frame)).await?;
                    }
                }

                () = tokio::time::sleep(check_interval) => {
                    if self.heartbeat.is_timed_out() {
                        error!(timeout_ms = self.config.pong_timeout_ms, "No traffic within pong timeout");
                        return Err(SourceError::HeartbeatTimeout);
                    }
                    if self.heartbeat.should_send_ping() {
                        match self.adapter.ping_request(&self.request_ids) {
                            Some(ping) => write.send(Message::Text(ping)).await?,
                            None => write.send(Message::Ping(Vec::new())).await?,
                        }
                        self.heartbeat.record_ping();
                        debug!("Sent keep-alive ping");
                    }
                }
            }
        }
    }

    fn handle_text(&self, text: &str) {
        match self.adapter.parse_message(text) {
            Ok(events) => {
                for event in events {
                    self.fanout.dispatch(event);
                }
            }
            Err(e) => warn!(adapter = self.adapter.name(), error = %e, "Dropping undecodable frame"),
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        backoff_delay(
            self.config.reconnect_base_delay_ms,
            self.config.reconnect_max_delay_ms,
            attempt,
        )
    }
}

/// `base * 2^(attempt-1)` capped at `max`.
fn backoff_delay(base_ms: u64, max_ms: u64, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let delay = base_ms.saturating_mul(1u64 << exponent);
    Duration::from_millis(delay.min(max_ms))
}
