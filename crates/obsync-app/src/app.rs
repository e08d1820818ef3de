//! Main application logic.

use crate::config::{AppConfig, ScheduleAction, ScheduledAction};
use crate::error::AppResult;
use crate::replay::ReplayDataSource;
use obsync_book::BookSnapshot;
use obsync_core::{MarketId, PriceLevel};
use obsync_telemetry::MetricsSnapshot;
use obsync_tracker::Tracker;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// State captured right before shutdown.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub books: BTreeMap<MarketId, BookSnapshot>,
    pub metrics: MetricsSnapshot,
    /// Scheduled actions that succeeded.
    pub completed_actions: usize,
}

/// Replay application.
pub struct Application {
    config: AppConfig,
    source: Arc<ReplayDataSource>,
    tracker: Arc<Tracker<ReplayDataSource>>,
}

impl Application {
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let source = Arc::new(ReplayDataSource::from_file(
            &config.replay.path,
            Duration::from_millis(config.replay.pace_ms),
            config.tracker.markets.clone(),
        )?);
        let tracker = Arc::new(Tracker::new(source.clone(), config.tracker.clone())?);

        Ok(Self {
            config,
            source,
            tracker,
        })
    }

    pub fn tracker(&self) -> &Arc<Tracker<ReplayDataSource>> {
        &self.tracker
    }

    /// Run until Ctrl-C or the end of the replay.
    pub async fn run(self) -> AppResult<RunSummary> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run until `shutdown` resolves or the end of the replay.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> AppResult<RunSummary> {
        tokio::pin!(shutdown);

        info!(
            markets = ?self.config.tracker.markets,
            events = self.source.event_count(),
            scheduled = self.config.schedule.len(),
            "Starting application"
        );
        self.tracker.start()?;

        tokio::select! {
            () = self.tracker.wait_ready() => {}
            () = &mut shutdown => {
                info!("Shutdown signal received before tracker was ready");
                return Ok(self.finish(0).await);
            }
        }

        let cancel = CancellationToken::new();
        let schedule = tokio::spawn(run_schedule(
            self.tracker.clone(),
            self.config.ordered_schedule(),
            cancel.clone(),
        ));

        let mut report_interval =
            tokio::time::interval(Duration::from_millis(self.config.report_interval_ms));
        // The first tick completes immediately.
        report_interval.tick().await;

        info!("Entering main loop");
        loop {
            tokio::select! {
                _ = report_interval.tick() => self.report(),
                () = self.source.wait_finished() => {
                    info!(drain_ms = self.config.replay.drain_ms, "Replay finished, draining");
                    tokio::time::sleep(Duration::from_millis(self.config.replay.drain_ms)).await;
                    break;
                }
                () = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        cancel.cancel();
        let completed = match schedule.await {
            Ok(completed) => completed,
            Err(e) => {
                error!(error = %e, "Schedule task failed");
                0
            }
        };

        Ok(self.finish(completed).await)
    }

    async fn finish(&self, completed_actions: usize) -> RunSummary {
        self.report();
        let summary = RunSummary {
            books: self.tracker.book_snapshots(),
            metrics: self.tracker.metrics(),
            completed_actions,
        };
        self.tracker.stop().await;
        info!(completed_actions, "Application stopped");
        summary
    }

    /// Log top of book per market and a metrics summary.
    fn report(&self) {
        let books = self.tracker.book_snapshots();
        for (market, book) in &books {
            let (bids, asks) = book.top(self.config.report_depth);
            info!(
                market = %market,
                snapshot_sequence = book.snapshot_sequence,
                last_diff_sequence = ?book.last_diff_sequence,
                bids = %format_levels(&bids),
                asks = %format_levels(&asks),
                spread_bps = ?book.spread_bps(),
                last_trade = ?book.last_trade_price.map(|p| p.to_string()),
                "Book"
            );
        }

        let metrics = self.tracker.metrics();
        info!(
            markets = books.len(),
            uptime_s = metrics.uptime_seconds,
            diffs_processed = metrics.total_diffs_processed,
            diffs_rejected = metrics.total_diffs_rejected,
            diffs_queued = metrics.total_diffs_queued,
            diffs_unknown = metrics.total_diffs_unknown,
            snapshots_processed = metrics.total_snapshots_processed,
            trades_processed = metrics.total_trades_processed,
            msgs_per_min = metrics.messages_per_minute.total,
            diff_latency_avg_ms = metrics.diff_latency.avg_ms,
            "Metrics"
        );
        match metrics.to_json() {
            Ok(json) => debug!(metrics = %json, "Metrics snapshot"),
            Err(e) => warn!(error = %e, "Failed to serialize metrics"),
        }
    }
}

/// Run scheduled adds and removes, timed from readiness.
///
/// Each action is awaited to completion: cancellation is only observed
/// between actions.
async fn run_schedule(
    tracker: Arc<Tracker<ReplayDataSource>>,
    schedule: Vec<ScheduledAction>,
    cancel: CancellationToken,
) -> usize {
    let start = Instant::now();
    let mut completed = 0;

    for entry in schedule {
        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep_until(start + Duration::from_millis(entry.at_ms)) => {}
        }

        let ok = match entry.action {
            ScheduleAction::Add => tracker.add_market(entry.market.clone()).await,
            ScheduleAction::Remove => tracker.remove_market(&entry.market).await,
        };
        if ok {
            info!(action = ?entry.action, market = %entry.market, at_ms = entry.at_ms, "Scheduled action applied");
            completed += 1;
        } else {
            warn!(action = ?entry.action, market = %entry.market, at_ms = entry.at_ms, "Scheduled action failed");
        }
    }
    completed
}

fn format_levels(levels: &[PriceLevel]) -> String {
    levels
        .iter()
        .map(|level| format!("{}x{}", level.price, level.size))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use obsync_core::{Price, Size};
    use rust_decimal_macros::dec;

    #[test]
    fn test_format_levels() {
        let levels = [
            PriceLevel::new(Price::new(dec!(100)), Size::new(dec!(1.5))),
            PriceLevel::new(Price::new(dec!(99.5)), Size::new(dec!(2))),
        ];
        assert_eq!(format_levels(&levels), "100x1.5 99.5x2");
        assert_eq!(format_levels(&[]), "");
    }
}
