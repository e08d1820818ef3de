//! Sampled latency statistics.

use serde::Serialize;
use std::collections::VecDeque;

pub const DEFAULT_SAMPLE_RATE: u32 = 10;
pub const DEFAULT_WINDOW: usize = 100;

/// Latency aggregate in milliseconds with a rolling window of recent samples.
///
/// `count`, `min_ms` and `max_ms` are updated on every record. Only every
/// `sample_rate`-th record enters the rolling window and the running total,
/// which is approximated as `sample * sample_rate`.
#[derive(Debug, Clone)]
pub struct LatencyStats {
    count: u64,
    total_ms: f64,
    min_ms: f64,
    max_ms: f64,
    recent: VecDeque<f64>,
    window: usize,
    sample_rate: u32,
    sample_counter: u32,
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::with_config(DEFAULT_SAMPLE_RATE, DEFAULT_WINDOW)
    }
}

impl LatencyStats {
    pub fn with_config(sample_rate: u32, window: usize) -> Self {
        let window = window.max(1);
        Self {
            count: 0,
            total_ms: 0.0,
            min_ms: f64::INFINITY,
            max_ms: 0.0,
            recent: VecDeque::with_capacity(window),
            window,
            sample_rate: sample_rate.max(1),
            sample_counter: 0,
        }
    }

    pub fn record(&mut self, latency_ms: f64) {
        self.count += 1;
        self.sample_counter += 1;

        if latency_ms < self.min_ms {
            self.min_ms = latency_ms;
        }
        if latency_ms > self.max_ms {
            self.max_ms = latency_ms;
        }

        if self.sample_counter >= self.sample_rate {
            self.sample_counter = 0;
            self.total_ms += latency_ms * f64::from(self.sample_rate);
            if self.recent.len() == self.window {
                self.recent.pop_front();
            }
            self.recent.push_back(latency_ms);
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn total_ms(&self) -> f64 {
        self.total_ms
    }

    /// Zero when nothing was recorded.
    pub fn min_ms(&self) -> f64 {
        if self.min_ms.is_finite() {
            self.min_ms
        } else {
            0.0
        }
    }

    pub fn max_ms(&self) -> f64 {
        self.max_ms
    }

    pub fn avg_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_ms / self.count as f64
        }
    }

    pub fn recent_avg_ms(&self) -> f64 {
        if self.recent.is_empty() {
            0.0
        } else {
            self.recent.iter().sum::<f64>() / self.recent.len() as f64
        }
    }

    pub fn recent_samples_count(&self) -> usize {
        self.recent.len()
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        LatencySnapshot {
            count: self.count,
            total_ms: self.total_ms,
            min_ms: self.min_ms(),
            max_ms: self.max_ms,
            avg_ms: self.avg_ms(),
            recent_avg_ms: self.recent_avg_ms(),
            recent_samples_count: self.recent_samples_count(),
        }
    }
}

/// Serializable view of [`LatencyStats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencySnapshot {
    pub count: u64,
    pub total_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub avg_ms: f64,
    pub recent_avg_ms: f64,
    pub recent_samples_count: usize,
}
