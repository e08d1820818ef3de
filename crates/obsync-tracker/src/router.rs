//! Event routers.
//!
//! One task per stream moves events from the data source into the
//! per-market state: diffs into the pending buffer or the serial queue,
//! snapshots into the serial queue, trades straight onto the book.

use crate::tracker::TrackerInner;
use obsync_core::{BookMessage, DiffEvent, MarketPhase, SnapshotEvent, TradeEvent};
use obsync_telemetry::{MessageKind, Outcome};
use obsync_ws::MarketDataSource;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const STATS_INTERVAL: Duration = Duration::from_secs(60);

/// What a router did with one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Handed to the market's serial queue (or applied, for trades).
    Delivered,
    /// Parked in the pending buffer of an initializing market.
    Buffered,
    /// Dropped: the sequence is not newer than the book.
    Stale,
    /// Dropped: no active market for this event.
    Rejected,
    /// Dropped: the market is not tracked at all.
    Unknown,
}

/// Per-minute routing counters, logged at debug level.
struct RouterStats {
    stream: &'static str,
    window_start: Instant,
    delivered: u64,
    buffered: u64,
    dropped: u64,
}

impl RouterStats {
    fn new(stream: &'static str) -> Self {
        Self {
            stream,
            window_start: Instant::now(),
            delivered: 0,
            buffered: 0,
            dropped: 0,
        }
    }

    fn record(&mut self, outcome: RouteOutcome) {
        match outcome {
            RouteOutcome::Delivered => self.delivered += 1,
            RouteOutcome::Buffered => self.buffered += 1,
            RouteOutcome::Stale | RouteOutcome::Rejected | RouteOutcome::Unknown => {
                self.dropped += 1;
            }
        }

        if self.window_start.elapsed() >= STATS_INTERVAL {
            debug!(
                stream = self.stream,
                delivered = self.delivered,
                buffered = self.buffered,
                dropped = self.dropped,
                "Router stats for the last minute"
            );
            *self = Self::new(self.stream);
        }
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

impl<S: MarketDataSource> TrackerInner<S> {
    pub(crate) fn route_diff(&self, diff: DiffEvent) -> RouteOutcome {
        let start = Instant::now();
        let Some(mut slot) = self.slots.get_mut(&diff.market) else {
            self.metrics.record(None, MessageKind::Diff, Outcome::Unknown, None);
            return RouteOutcome::Unknown;
        };

        match slot.phase {
            MarketPhase::Initializing => {
                if let Some(evicted) = slot.pending.push(diff) {
                    warn!(
                        market = %evicted.market,
                        sequence = evicted.sequence,
                        "Pending buffer full, dropped oldest diff"
                    );
                    self.metrics.record(None, MessageKind::Diff, Outcome::Rejected, None);
                }
                self.metrics.record(None, MessageKind::Diff, Outcome::Queued, None);
                RouteOutcome::Buffered
            }
            MarketPhase::Active => {
                let Some((book, queue)) = slot.active_parts() else {
                    self.metrics.record(None, MessageKind::Diff, Outcome::Rejected, None);
                    return RouteOutcome::Rejected;
                };
                let market = diff.market.clone();

                if book.read().is_stale(diff.sequence, self.policy) {
                    self.metrics
                        .record(Some(&market), MessageKind::Diff, Outcome::Rejected, None);
                    return RouteOutcome::Stale;
                }

                if queue.send(BookMessage::Diff(diff)).is_err() {
                    self.metrics
                        .record(Some(&market), MessageKind::Diff, Outcome::Rejected, None);
                    return RouteOutcome::Rejected;
                }
                self.metrics.record(
                    Some(&market),
                    MessageKind::Diff,
                    Outcome::Processed,
                    Some(elapsed_ms(start)),
                );
                RouteOutcome::Delivered
            }
            MarketPhase::Unregistered | MarketPhase::Removed => {
                self.metrics.record(None, MessageKind::Diff, Outcome::Unknown, None);
                RouteOutcome::Unknown
            }
        }
    }

    pub(crate) fn route_snapshot(&self, snapshot: SnapshotEvent) -> RouteOutcome {
        let start = Instant::now();
        let Some(slot) = self.slots.get(&snapshot.market) else {
            self.metrics
                .record(None, MessageKind::Snapshot, Outcome::Rejected, None);
            return RouteOutcome::Rejected;
        };
        let Some((_, queue)) = slot.active_parts() else {
            self.metrics
                .record(None, MessageKind::Snapshot, Outcome::Rejected, None);
            return RouteOutcome::Rejected;
        };

        let market = snapshot.market.clone();
        if queue.send(BookMessage::Snapshot(snapshot)).is_err() {
            self.metrics
                .record(Some(&market), MessageKind::Snapshot, Outcome::Rejected, None);
            return RouteOutcome::Rejected;
        }
        self.metrics.record(
            Some(&market),
            MessageKind::Snapshot,
            Outcome::Processed,
            Some(elapsed_ms(start)),
        );
        RouteOutcome::Delivered
    }

    pub(crate) fn route_trade(&self, trade: TradeEvent) -> RouteOutcome {
        let start = Instant::now();
        let Some(slot) = self.slots.get(&trade.market) else {
            self.metrics.record(None, MessageKind::Trade, Outcome::Rejected, None);
            return RouteOutcome::Rejected;
        };
        let Some((book, _)) = slot.active_parts() else {
            self.metrics.record(None, MessageKind::Trade, Outcome::Rejected, None);
            return RouteOutcome::Rejected;
        };

        book.write().apply_trade(&trade);
        self.metrics.record(
            Some(&trade.market),
            MessageKind::Trade,
            Outcome::Processed,
            Some(elapsed_ms(start)),
        );
        RouteOutcome::Delivered
    }
}

pub(crate) async fn run_diff_router<S: MarketDataSource>(
    inner: Arc<TrackerInner<S>>,
    mut rx: mpsc::UnboundedReceiver<DiffEvent>,
    shutdown: CancellationToken,
) {
    let mut stats = RouterStats::new("diffs");
    loop {
        let diff = tokio::select! {
            () = shutdown.cancelled() => return,
            diff = rx.recv() => match diff {
                Some(diff) => diff,
                None => {
                    debug!("Diff stream closed, router exiting");
                    return;
                }
            },
        };
        stats.record(inner.route_diff(diff));
    }
}

pub(crate) async fn run_snapshot_router<S: MarketDataSource>(
    inner: Arc<TrackerInner<S>>,
    mut rx: mpsc::UnboundedReceiver<SnapshotEvent>,
    shutdown: CancellationToken,
) {
    tokio::select! {
        () = shutdown.cancelled() => return,
        () = inner.ready.wait() => {}
    }

    let mut stats = RouterStats::new("snapshots");
    loop {
        let snapshot = tokio::select! {
            () = shutdown.cancelled() => return,
            snapshot = rx.recv() => match snapshot {
                Some(snapshot) => snapshot,
                None => {
                    debug!("Snapshot stream closed, router exiting");
                    return;
                }
            },
        };
        stats.record(inner.route_snapshot(snapshot));
    }
}

pub(crate) async fn run_trade_router<S: MarketDataSource>(
    inner: Arc<TrackerInner<S>>,
    mut rx: mpsc::UnboundedReceiver<TradeEvent>,
    shutdown: CancellationToken,
) {
    tokio::select! {
        () = shutdown.cancelled() => return,
        () = inner.ready.wait() => {}
    }

    let mut stats = RouterStats::new("trades");
    loop {
        let trade = tokio::select! {
            () = shutdown.cancelled() => return,
            trade = rx.recv() => match trade {
                Some(trade) => trade,
                None => {
                    debug!("Trade stream closed, router exiting");
                    return;
                }
            },
        };
        stats.record(inner.route_trade(trade));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_count_outcomes() {
        let mut stats = RouterStats::new("diffs");
        stats.record(RouteOutcome::Delivered);
        stats.record(RouteOutcome::Buffered);
        stats.record(RouteOutcome::Stale);
        stats.record(RouteOutcome::Unknown);

        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.buffered, 1);
        assert_eq!(stats.dropped, 2);
    }
}
