//! Per-market serial worker.
//!
//! The only writer of a market's levels: diffs and snapshots are applied
//! strictly in queue order, after any diffs buffered while the market was
//! initializing.

use crate::error::TrackerResult;
use obsync_book::{RecentDiffWindow, SharedBook, StalenessPolicy};
use obsync_core::{BookMessage, DiffEvent, MarketId, SnapshotEvent};
use obsync_telemetry::{MessageKind, Outcome, TrackerMetrics};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

const STATS_INTERVAL: Duration = Duration::from_secs(60);

pub(crate) struct MarketWorker {
    market: MarketId,
    book: SharedBook,
    queue: mpsc::UnboundedReceiver<BookMessage>,
    pending: VecDeque<DiffEvent>,
    window: RecentDiffWindow,
    policy: StalenessPolicy,
    metrics: Arc<TrackerMetrics>,
    error_backoff: Duration,
    cancel: CancellationToken,
    applied_in_window: u64,
    window_start: Instant,
}

impl MarketWorker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        market: MarketId,
        book: SharedBook,
        queue: mpsc::UnboundedReceiver<BookMessage>,
        pending: VecDeque<DiffEvent>,
        window_capacity: usize,
        policy: StalenessPolicy,
        metrics: Arc<TrackerMetrics>,
        error_backoff: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            market,
            book,
            queue,
            pending,
            window: RecentDiffWindow::new(window_capacity),
            policy,
            metrics,
            error_backoff,
            cancel,
            applied_in_window: 0,
            window_start: Instant::now(),
        }
    }

    pub(crate) async fn run(mut self) {
        if !self.pending.is_empty() {
            debug!(
                market = %self.market,
                pending = self.pending.len(),
                "Replaying diffs buffered during initialization"
            );
        }

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let message = match self.pending.pop_front() {
                Some(diff) => BookMessage::Diff(diff),
                None => tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => break,
                    message = self.queue.recv() => match message {
                        Some(message) => message,
                        None => break,
                    },
                },
            };

            if let Err(e) = self.process(message) {
                error!(
                    market = %self.market,
                    error = %e,
                    backoff_ms = self.error_backoff.as_millis() as u64,
                    "Failed to apply book update"
                );
                tokio::select! {
                    () = self.cancel.cancelled() => break,
                    () = tokio::time::sleep(self.error_backoff) => {}
                }
            }
        }

        info!(market = %self.market, "Market worker stopped");
    }

    fn process(&mut self, message: BookMessage) -> TrackerResult<()> {
        match message {
            BookMessage::Diff(diff) => self.apply_diff(diff),
            BookMessage::Snapshot(snapshot) => self.apply_snapshot(&snapshot),
        }
    }

    fn apply_diff(&mut self, diff: DiffEvent) -> TrackerResult<()> {
        {
            let mut book = self.book.write();
            // The router checked too, but a snapshot may have landed since.
            if book.is_stale(diff.sequence, self.policy) {
                drop(book);
                debug!(
                    market = %self.market,
                    sequence = diff.sequence,
                    "Dropped stale diff"
                );
                self.metrics
                    .record(Some(&self.market), MessageKind::Diff, Outcome::Rejected, None);
                return Ok(());
            }
            book.apply_diff(&diff.bids, &diff.asks, diff.sequence)?;
        }

        self.window.push(diff);
        self.applied_in_window += 1;
        if self.window_start.elapsed() >= STATS_INTERVAL {
            debug!(
                market = %self.market,
                applied = self.applied_in_window,
                "Applied order book diffs in the last minute"
            );
            self.applied_in_window = 0;
            self.window_start = Instant::now();
        }
        Ok(())
    }

    fn apply_snapshot(&mut self, snapshot: &SnapshotEvent) -> TrackerResult<()> {
        let replayed = self
            .book
            .write()
            .restore_from_snapshot_and_diffs(snapshot, &self.window)?;
        debug!(
            market = %self.market,
            sequence = snapshot.sequence,
            replayed,
            "Applied snapshot"
        );
        Ok(())
    }
}
