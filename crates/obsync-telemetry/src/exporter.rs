//! Prometheus export of tracker metrics.
//!
//! Each exporter owns its own `Registry`, so several trackers in one
//! process never collide on metric names.

use crate::error::{TelemetryError, TelemetryResult};
use crate::metrics::{MessageKind, Outcome};
use obsync_core::MarketId;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

/// `market` label value for messages that cannot be attributed to a tracked market.
pub const UNATTRIBUTED: &str = "-";

pub struct PrometheusExporter {
    registry: Registry,
    messages: IntCounterVec,
    latency: HistogramVec,
}

impl std::fmt::Debug for PrometheusExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusExporter").finish_non_exhaustive()
    }
}

impl PrometheusExporter {
    pub fn new() -> TelemetryResult<Self> {
        let registry = Registry::new();

        let messages = IntCounterVec::new(
            Opts::new(
                "obsync_messages_total",
                "Order book messages routed, by market, kind and outcome",
            ),
            &["market", "kind", "outcome"],
        )?;
        let latency = HistogramVec::new(
            HistogramOpts::new(
                "obsync_processing_latency_ms",
                "Message processing latency in milliseconds",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 50.0, 100.0]),
            &["kind"],
        )?;

        registry.register(Box::new(messages.clone()))?;
        registry.register(Box::new(latency.clone()))?;

        Ok(Self {
            registry,
            messages,
            latency,
        })
    }

    pub fn record(&self, market: Option<&MarketId>, kind: MessageKind, outcome: Outcome) {
        let market = market.map_or(UNATTRIBUTED, |m| m.as_str());
        self.messages
            .with_label_values(&[market, kind.as_str(), outcome.as_str()])
            .inc();
    }

    pub fn observe_latency(&self, kind: MessageKind, latency_ms: f64) {
        self.latency
            .with_label_values(&[kind.as_str()])
            .observe(latency_ms);
    }

    /// Drop every label set of a market.
    pub fn remove_market(&self, market: &MarketId) {
        for kind in MessageKind::ALL {
            for outcome in Outcome::ALL {
                // Missing label sets are expected: not every combination is ever recorded.
                let _ = self
                    .messages
                    .remove_label_values(&[market.as_str(), kind.as_str(), outcome.as_str()]);
            }
        }
    }

    /// Current value of one counter (0 if never recorded).
    pub fn message_count(&self, market: Option<&MarketId>, kind: MessageKind, outcome: Outcome) -> u64 {
        let market = market.map_or(UNATTRIBUTED, |m| m.as_str());
        let wanted = [("market", market), ("kind", kind.as_str()), ("outcome", outcome.as_str())];

        self.registry
            .gather()
            .iter()
            .filter(|family| family.get_name() == "obsync_messages_total")
            .flat_map(|family| family.get_metric().iter())
            .find(|metric| {
                wanted.iter().all(|(name, value)| {
                    metric
                        .get_label()
                        .iter()
                        .any(|l| l.get_name() == *name && l.get_value() == *value)
                })
            })
            .map_or(0, |metric| metric.get_counter().get_value() as u64)
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn render(&self) -> TelemetryResult<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_recorded_series() {
        let exporter = PrometheusExporter::new().unwrap();
        let market = MarketId::from("BTC-USD");

        exporter.record(Some(&market), MessageKind::Diff, Outcome::Processed);
        exporter.observe_latency(MessageKind::Diff, 0.2);

        let text = exporter.render().unwrap();
        assert!(text.contains("obsync_messages_total"));
        assert!(text.contains("market=\"BTC-USD\""));
        assert!(text.contains("obsync_processing_latency_ms"));
    }

    #[test]
    fn test_remove_market_drops_label_sets() {
        let exporter = PrometheusExporter::new().unwrap();
        let market = MarketId::from("ETH-USD");

        exporter.record(Some(&market), MessageKind::Trade, Outcome::Processed);
        exporter.record(Some(&market), MessageKind::Diff, Outcome::Rejected);
        exporter.record(None, MessageKind::Diff, Outcome::Unknown);
        exporter.remove_market(&market);

        let text = exporter.render().unwrap();
        assert!(!text.contains("ETH-USD"));
        assert_eq!(exporter.message_count(None, MessageKind::Diff, Outcome::Unknown), 1);
    }

    #[test]
    fn test_independent_registries() {
        let a = PrometheusExporter::new().unwrap();
        let b = PrometheusExporter::new().unwrap();

        a.record(None, MessageKind::Snapshot, Outcome::Rejected);

        assert_eq!(a.message_count(None, MessageKind::Snapshot, Outcome::Rejected), 1);
        assert_eq!(b.message_count(None, MessageKind::Snapshot, Outcome::Rejected), 0);
    }
}
