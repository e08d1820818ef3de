//! Metrics and structured logging for the order book tracker.
//!
//! - Latency/throughput aggregates, global and per market, with sampled latency
//! - Optional Prometheus export through an instance-owned registry
//! - Structured logging initialization

pub mod error;
pub mod exporter;
pub mod latency;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use exporter::PrometheusExporter;
pub use latency::{LatencySnapshot, LatencyStats};
pub use logging::{init_logging, LogFormat};
pub use metrics::{
    MarketMetrics, MarketMetricsSnapshot, MessageKind, MessageRates, MetricsConfig,
    MetricsSnapshot, Outcome, TrackerMetrics,
};
