//! Application configuration.

use crate::error::{AppError, AppResult};
use obsync_core::MarketId;
use obsync_tracker::TrackerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_pace_ms() -> u64 {
    10
}

fn default_drain_ms() -> u64 {
    500
}

fn default_report_interval_ms() -> u64 {
    5000
}

fn default_report_depth() -> usize {
    3
}

/// Recorded feed to replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Newline-delimited JSON of stream events.
    pub path: PathBuf,
    /// Delay between two replayed events.
    #[serde(default = "default_pace_ms")]
    pub pace_ms: u64,
    /// Time left for queued events to settle once the feed is exhausted.
    #[serde(default = "default_drain_ms")]
    pub drain_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleAction {
    Add,
    Remove,
}

/// One runtime add/remove, relative to tracker readiness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledAction {
    pub at_ms: u64,
    pub action: ScheduleAction,
    pub market: MarketId,
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub tracker: TrackerConfig,
    pub replay: ReplayConfig,
    #[serde(default)]
    pub schedule: Vec<ScheduledAction>,
    #[serde(default = "default_report_interval_ms")]
    pub report_interval_ms: u64,
    /// Levels per side shown in reports.
    #[serde(default = "default_report_depth")]
    pub report_depth: usize,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read {}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        self.tracker.validate()?;
        if self.report_interval_ms == 0 {
            return Err(AppError::Config("report_interval_ms must be > 0".to_string()));
        }
        if let Some(entry) = self
            .schedule
            .iter()
            .find(|entry| entry.market.as_str().trim().is_empty())
        {
            return Err(AppError::Config(format!(
                "blank market in schedule entry at {} ms",
                entry.at_ms
            )));
        }
        Ok(())
    }

    /// Schedule in execution order. Entries with equal times keep file order.
    pub fn ordered_schedule(&self) -> Vec<ScheduledAction> {
        let mut schedule = self.schedule.clone();
        schedule.sort_by_key(|entry| entry.at_ms);
        schedule
    }
}
