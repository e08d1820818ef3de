//! Tracker throughput and latency metrics.
//!
//! One global aggregate plus a per-market registry. Per-market entries are
//! created on first use and deleted by [`TrackerMetrics::remove_market`],
//! so markets cycling through add/remove never leave entries behind.
//! Updates are best-effort and not linearizable with book mutations.

use crate::error::TelemetryResult;
use crate::exporter::PrometheusExporter;
use crate::latency::{LatencySnapshot, LatencyStats, DEFAULT_SAMPLE_RATE, DEFAULT_WINDOW};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use obsync_core::MarketId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Message stream a metric refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Diff,
    Snapshot,
    Trade,
}

impl MessageKind {
    pub const ALL: [MessageKind; 3] = [Self::Diff, Self::Snapshot, Self::Trade];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Diff => "diff",
            Self::Snapshot => "snapshot",
            Self::Trade => "trade",
        }
    }
}

/// What happened to a routed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// Accepted into a market's queue or applied.
    Processed,
    /// Dropped as stale or for a market without a live queue.
    Rejected,
    /// Parked in a pending buffer while the market initializes.
    Queued,
    /// Dropped because the market is not tracked at all.
    Unknown,
}

impl Outcome {
    pub const ALL: [Outcome; 4] = [Self::Processed, Self::Rejected, Self::Queued, Self::Unknown];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Rejected => "rejected",
            Self::Queued => "queued",
            Self::Unknown => "unknown",
        }
    }
}

fn default_sample_rate() -> u32 {
    DEFAULT_SAMPLE_RATE
}

fn default_latency_window() -> usize {
    DEFAULT_WINDOW
}

fn default_prometheus() -> bool {
    true
}

/// Metrics configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Record one latency sample out of every N messages.
    #[serde(default = "default_sample_rate")]
    pub latency_sample_rate: u32,
    /// Rolling window of recent latency samples.
    #[serde(default = "default_latency_window")]
    pub latency_window: usize,
    /// Mirror counters into a Prometheus registry.
    #[serde(default = "default_prometheus")]
    pub prometheus: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            latency_sample_rate: default_sample_rate(),
            latency_window: default_latency_window(),
            prometheus: default_prometheus(),
        }
    }
}

/// Messages per minute since a start instant.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct MessageRates {
    pub diffs: f64,
    pub snapshots: f64,
    pub trades: f64,
    pub total: f64,
}

impl MessageRates {
    /// All zero when no time elapsed.
    pub fn compute(diffs: u64, snapshots: u64, trades: u64, elapsed: Duration) -> Self {
        let minutes = elapsed.as_secs_f64() / 60.0;
        if minutes <= 0.0 {
            return Self::default();
        }
        let diffs = diffs as f64 / minutes;
        let snapshots = snapshots as f64 / minutes;
        let trades = trades as f64 / minutes;
        Self {
            diffs,
            snapshots,
            trades,
            total: diffs + snapshots + trades,
        }
    }
}

/// Metrics of a single market.
#[derive(Debug, Clone)]
pub struct MarketMetrics {
    pub market: MarketId,
    pub diffs_processed: u64,
    pub diffs_rejected: u64,
    pub snapshots_processed: u64,
    pub trades_processed: u64,
    pub trades_rejected: u64,
    pub last_diff_at: Option<DateTime<Utc>>,
    pub last_snapshot_at: Option<DateTime<Utc>>,
    pub last_trade_at: Option<DateTime<Utc>>,
    pub tracking_started_at: DateTime<Utc>,
    tracking_started: Instant,
    pub diff_latency: LatencyStats,
    pub snapshot_latency: LatencyStats,
    pub trade_latency: LatencyStats,
}

impl MarketMetrics {
    pub fn new(market: MarketId, config: &MetricsConfig) -> Self {
        let latency = || LatencyStats::with_config(config.latency_sample_rate, config.latency_window);
        Self {
            market,
            diffs_processed: 0,
            diffs_rejected: 0,
            snapshots_processed: 0,
            trades_processed: 0,
            trades_rejected: 0,
            last_diff_at: None,
            last_snapshot_at: None,
            last_trade_at: None,
            tracking_started_at: Utc::now(),
            tracking_started: Instant::now(),
            diff_latency: latency(),
            snapshot_latency: latency(),
            trade_latency: latency(),
        }
    }

    fn record(&mut self, kind: MessageKind, outcome: Outcome, latency_ms: Option<f64>) {
        let now = Utc::now();
        match (kind, outcome) {
            (MessageKind::Diff, Outcome::Processed) => {
                self.diffs_processed += 1;
                self.last_diff_at = Some(now);
            }
            (MessageKind::Diff, Outcome::Rejected) => self.diffs_rejected += 1,
            (MessageKind::Snapshot, Outcome::Processed) => {
                self.snapshots_processed += 1;
                self.last_snapshot_at = Some(now);
            }
            (MessageKind::Trade, Outcome::Processed) => {
                self.trades_processed += 1;
                self.last_trade_at = Some(now);
            }
            (MessageKind::Trade, Outcome::Rejected) => self.trades_rejected += 1,
            _ => {}
        }

        if let Some(latency_ms) = latency_ms {
            match kind {
                MessageKind::Diff => self.diff_latency.record(latency_ms),
                MessageKind::Snapshot => self.snapshot_latency.record(latency_ms),
                MessageKind::Trade => self.trade_latency.record(latency_ms),
            }
        }
    }

    pub fn messages_per_minute(&self) -> MessageRates {
        MessageRates::compute(
            self.diffs_processed,
            self.snapshots_processed,
            self.trades_processed,
            self.tracking_started.elapsed(),
        )
    }

    pub fn snapshot(&self) -> MarketMetricsSnapshot {
        MarketMetricsSnapshot {
            market: self.market.clone(),
            diffs_processed: self.diffs_processed,
            diffs_rejected: self.diffs_rejected,
            snapshots_processed: self.snapshots_processed,
            trades_processed: self.trades_processed,
            trades_rejected: self.trades_rejected,
            last_diff_at: self.last_diff_at,
            last_snapshot_at: self.last_snapshot_at,
            last_trade_at: self.last_trade_at,
            tracking_started_at: self.tracking_started_at,
            messages_per_minute: self.messages_per_minute(),
            diff_latency: self.diff_latency.snapshot(),
            snapshot_latency: self.snapshot_latency.snapshot(),
            trade_latency: self.trade_latency.snapshot(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketMetricsSnapshot {
    pub market: MarketId,
    pub diffs_processed: u64,
    pub diffs_rejected: u64,
    pub snapshots_processed: u64,
    pub trades_processed: u64,
    pub trades_rejected: u64,
    pub last_diff_at: Option<DateTime<Utc>>,
    pub last_snapshot_at: Option<DateTime<Utc>>,
    pub last_trade_at: Option<DateTime<Utc>>,
    pub tracking_started_at: DateTime<Utc>,
    pub messages_per_minute: MessageRates,
    pub diff_latency: LatencySnapshot,
    pub snapshot_latency: LatencySnapshot,
    pub trade_latency: LatencySnapshot,
}

#[derive(Debug)]
struct GlobalCounters {
    diffs_processed: u64,
    diffs_rejected: u64,
    diffs_queued: u64,
    diffs_unknown: u64,
    snapshots_processed: u64,
    snapshots_rejected: u64,
    trades_processed: u64,
    trades_rejected: u64,
    started: Instant,
    started_at: DateTime<Utc>,
    diff_latency: LatencyStats,
    snapshot_latency: LatencyStats,
    trade_latency: LatencyStats,
}

impl GlobalCounters {
    fn new(config: &MetricsConfig) -> Self {
        let latency = || LatencyStats::with_config(config.latency_sample_rate, config.latency_window);
        Self {
            diffs_processed: 0,
            diffs_rejected: 0,
            diffs_queued: 0,
            diffs_unknown: 0,
            snapshots_processed: 0,
            snapshots_rejected: 0,
            trades_processed: 0,
            trades_rejected: 0,
            started: Instant::now(),
            started_at: Utc::now(),
            diff_latency: latency(),
            snapshot_latency: latency(),
            trade_latency: latency(),
        }
    }

    fn record(&mut self, kind: MessageKind, outcome: Outcome, latency_ms: Option<f64>) {
        let counter = match (kind, outcome) {
            (MessageKind::Diff, Outcome::Processed) => &mut self.diffs_processed,
            (MessageKind::Diff, Outcome::Rejected) => &mut self.diffs_rejected,
            (MessageKind::Diff, Outcome::Queued) => &mut self.diffs_queued,
            (MessageKind::Diff, Outcome::Unknown) => &mut self.diffs_unknown,
            (MessageKind::Snapshot, Outcome::Processed) => &mut self.snapshots_processed,
            (MessageKind::Snapshot, _) => &mut self.snapshots_rejected,
            (MessageKind::Trade, Outcome::Processed) => &mut self.trades_processed,
            (MessageKind::Trade, _) => &mut self.trades_rejected,
        };
        *counter += 1;

        if let Some(latency_ms) = latency_ms {
            match kind {
                MessageKind::Diff => self.diff_latency.record(latency_ms),
                MessageKind::Snapshot => self.snapshot_latency.record(latency_ms),
                MessageKind::Trade => self.trade_latency.record(latency_ms),
            }
        }
    }
}

/// Serializable view of all tracker metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total_diffs_processed: u64,
    pub total_diffs_rejected: u64,
    pub total_diffs_queued: u64,
    pub total_diffs_unknown: u64,
    pub total_snapshots_processed: u64,
    pub total_snapshots_rejected: u64,
    pub total_trades_processed: u64,
    pub total_trades_rejected: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: f64,
    pub messages_per_minute: MessageRates,
    pub diff_latency: LatencySnapshot,
    pub snapshot_latency: LatencySnapshot,
    pub trade_latency: LatencySnapshot,
    pub markets: BTreeMap<MarketId, MarketMetricsSnapshot>,
}

impl MetricsSnapshot {
    pub fn to_json(&self) -> TelemetryResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Global and per-market tracker metrics.
#[derive(Debug)]
pub struct TrackerMetrics {
    config: MetricsConfig,
    global: Mutex<GlobalCounters>,
    markets: DashMap<MarketId, MarketMetrics>,
    exporter: Option<PrometheusExporter>,
}

impl TrackerMetrics {
    pub fn new(config: MetricsConfig) -> TelemetryResult<Self> {
        let exporter = if config.prometheus {
            Some(PrometheusExporter::new()?)
        } else {
            None
        };
        Ok(Self {
            global: Mutex::new(GlobalCounters::new(&config)),
            markets: DashMap::new(),
            exporter,
            config,
        })
    }

    /// Restart uptime and rate accounting (counters are kept).
    pub fn mark_started(&self) {
        let mut global = self.global.lock();
        global.started = Instant::now();
        global.started_at = Utc::now();
    }

    /// Record one routed message.
    ///
    /// With `Some(market)` the market's entry is updated, created on first
    /// use. Callers pass `None` for messages that cannot be attributed to a
    /// tracked market.
    pub fn record(
        &self,
        market: Option<&MarketId>,
        kind: MessageKind,
        outcome: Outcome,
        latency_ms: Option<f64>,
    ) {
        self.global.lock().record(kind, outcome, latency_ms);

        if let Some(market) = market {
            self.markets
                .entry(market.clone())
                .or_insert_with(|| MarketMetrics::new(market.clone(), &self.config))
                .record(kind, outcome, latency_ms);
        }

        if let Some(exporter) = &self.exporter {
            exporter.record(market, kind, outcome);
            if let Some(latency_ms) = latency_ms {
                exporter.observe_latency(kind, latency_ms);
            }
        }
    }

    /// Delete every metric entry of a market. Returns true if one existed.
    pub fn remove_market(&self, market: &MarketId) -> bool {
        let removed = self.markets.remove(market).is_some();
        if let Some(exporter) = &self.exporter {
            exporter.remove_market(market);
        }
        if removed {
            debug!(market = %market, "Removed market metrics");
        }
        removed
    }

    pub fn has_market(&self, market: &MarketId) -> bool {
        self.markets.contains_key(market)
    }

    pub fn market_count(&self) -> usize {
        self.markets.len()
    }

    pub fn market_snapshot(&self, market: &MarketId) -> Option<MarketMetricsSnapshot> {
        self.markets.get(market).map(|m| m.snapshot())
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let markets = self
            .markets
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect();

        let global = self.global.lock();
        MetricsSnapshot {
            total_diffs_processed: global.diffs_processed,
            total_diffs_rejected: global.diffs_rejected,
            total_diffs_queued: global.diffs_queued,
            total_diffs_unknown: global.diffs_unknown,
            total_snapshots_processed: global.snapshots_processed,
            total_snapshots_rejected: global.snapshots_rejected,
            total_trades_processed: global.trades_processed,
            total_trades_rejected: global.trades_rejected,
            started_at: global.started_at,
            uptime_seconds: global.started.elapsed().as_secs_f64(),
            messages_per_minute: MessageRates::compute(
                global.diffs_processed,
                global.snapshots_processed,
                global.trades_processed,
                global.started.elapsed(),
            ),
            diff_latency: global.diff_latency.snapshot(),
            snapshot_latency: global.snapshot_latency.snapshot(),
            trade_latency: global.trade_latency.snapshot(),
            markets,
        }
    }

    pub fn exporter(&self) -> Option<&PrometheusExporter> {
        self.exporter.as_ref()
    }

    /// Prometheus text output, `None` when export is disabled.
    pub fn prometheus_text(&self) -> Option<TelemetryResult<String>> {
        self.exporter.as_ref().map(|e| e.render())
    }
}
