//! Tracker configuration.

use crate::error::{TrackerError, TrackerResult};
use obsync_book::StalenessPolicy;
use obsync_core::MarketId;
use obsync_telemetry::MetricsConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

fn default_init_delay_ms() -> u64 {
    1000
}

fn default_pending_buffer_capacity() -> usize {
    1000
}

fn default_recent_diff_window() -> usize {
    32
}

fn default_worker_error_backoff_ms() -> u64 {
    5000
}

fn default_listener_backoff_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

fn default_stale_after_ms() -> u64 {
    180_000
}

fn default_min_interval_ms() -> u64 {
    5000
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_error_backoff_ms() -> u64 {
    30_000
}

/// REST fallback refresh of last traded prices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRefreshConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// A market is due when no trade was applied for this long.
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,
    /// Minimum time between two REST refreshes of one market.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    /// Sleep when no market is due.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Sleep after a failed REST call.
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
}

impl Default for TradeRefreshConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            stale_after_ms: default_stale_after_ms(),
            min_interval_ms: default_min_interval_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            error_backoff_ms: default_error_backoff_ms(),
        }
    }
}

/// Tracker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Markets initialized on start.
    #[serde(default)]
    pub markets: Vec<MarketId>,
    /// Pause between initial book fetches at startup.
    #[serde(default = "default_init_delay_ms")]
    pub init_delay_ms: u64,
    /// Diffs buffered per initializing market; oldest are dropped beyond it.
    #[serde(default = "default_pending_buffer_capacity")]
    pub pending_buffer_capacity: usize,
    /// Applied diffs kept per market for snapshot replay.
    #[serde(default = "default_recent_diff_window")]
    pub recent_diff_window: usize,
    #[serde(default = "default_worker_error_backoff_ms")]
    pub worker_error_backoff_ms: u64,
    #[serde(default = "default_listener_backoff_ms")]
    pub listener_backoff_ms: u64,
    /// Also drop diffs not newer than the last applied diff.
    #[serde(default)]
    pub enforce_monotonic_diffs: bool,
    #[serde(default)]
    pub trade_refresh: TradeRefreshConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            markets: Vec::new(),
            init_delay_ms: default_init_delay_ms(),
            pending_buffer_capacity: default_pending_buffer_capacity(),
            recent_diff_window: default_recent_diff_window(),
            worker_error_backoff_ms: default_worker_error_backoff_ms(),
            listener_backoff_ms: default_listener_backoff_ms(),
            enforce_monotonic_diffs: false,
            trade_refresh: TradeRefreshConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl TrackerConfig {
    pub fn with_markets(markets: impl IntoIterator<Item = MarketId>) -> Self {
        Self {
            markets: markets.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> TrackerResult<()> {
        if self.pending_buffer_capacity == 0 {
            return Err(TrackerError::InvalidConfig(
                "pending_buffer_capacity must be > 0".to_string(),
            ));
        }
        if self.recent_diff_window == 0 {
            return Err(TrackerError::InvalidConfig(
                "recent_diff_window must be > 0".to_string(),
            ));
        }
        if self.metrics.latency_sample_rate == 0 || self.metrics.latency_window == 0 {
            return Err(TrackerError::InvalidConfig(
                "metrics sample rate and window must be > 0".to_string(),
            ));
        }
        if self.trade_refresh.enabled {
            if self.trade_refresh.poll_interval_ms == 0 {
                return Err(TrackerError::InvalidConfig(
                    "trade_refresh.poll_interval_ms must be > 0".to_string(),
                ));
            }
            if self.trade_refresh.min_interval_ms == 0 {
                return Err(TrackerError::InvalidConfig(
                    "trade_refresh.min_interval_ms must be > 0".to_string(),
                ));
            }
        }

        let mut seen = HashSet::new();
        for market in &self.markets {
            if market.as_str().trim().is_empty() {
                return Err(TrackerError::InvalidConfig("blank market id".to_string()));
            }
            if !seen.insert(market) {
                return Err(TrackerError::InvalidConfig(format!(
                    "duplicate market {market}"
                )));
            }
        }
        Ok(())
    }

    pub fn staleness_policy(&self) -> StalenessPolicy {
        if self.enforce_monotonic_diffs {
            StalenessPolicy::StrictlyIncreasing
        } else {
            StalenessPolicy::SnapshotOnly
        }
    }

    pub fn init_delay(&self) -> Duration {
        Duration::from_millis(self.init_delay_ms)
    }

    pub fn worker_error_backoff(&self) -> Duration {
        Duration::from_millis(self.worker_error_backoff_ms)
    }

    pub fn listener_backoff(&self) -> Duration {
        Duration::from_millis(self.listener_backoff_ms)
    }
}
