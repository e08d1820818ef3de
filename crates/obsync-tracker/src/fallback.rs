//! REST fallback for last traded prices.
//!
//! Trades are sparse on quiet markets. Markets whose last trade is older
//! than `stale_after_ms` get their price refreshed in one batched request,
//! at most once per `min_interval_ms`. Every pass ends with a sleep, so
//! the loop yields even when markets are due again immediately.

use crate::tracker::TrackerInner;
use obsync_book::SharedBook;
use obsync_core::MarketId;
use obsync_ws::MarketDataSource;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub(crate) async fn run_trade_refresh<S: MarketDataSource>(
    inner: Arc<TrackerInner<S>>,
    shutdown: CancellationToken,
) {
    tokio::select! {
        () = shutdown.cancelled() => return,
        () = inner.ready.wait() => {}
    }

    let config = &inner.config.trade_refresh;
    let stale_after = Duration::from_millis(config.stale_after_ms);
    let min_interval = Duration::from_millis(config.min_interval_ms);
    let poll_interval = Duration::from_millis(config.poll_interval_ms);
    let error_backoff = Duration::from_millis(config.error_backoff_ms);

    loop {
        let due = inner.books_due_for_refresh(Instant::now(), stale_after, min_interval);
        if due.is_empty() {
            tokio::select! {
                () = shutdown.cancelled() => return,
                () = tokio::time::sleep(poll_interval) => continue,
            }
        }

        let markets: Vec<MarketId> = due.iter().map(|(market, _)| market.clone()).collect();
        let result = tokio::select! {
            () = shutdown.cancelled() => return,
            result = inner.source.get_last_traded_prices(&markets) => result,
        };

        match result {
            Ok(prices) => {
                let mut updated = 0usize;
                for (market, book) in &due {
                    let mut book = book.write();
                    match prices.get(market) {
                        Some(price) => {
                            book.apply_rest_trade_price(*price);
                            updated += 1;
                        }
                        None => book.touch_rest_refresh(),
                    }
                }
                debug!(requested = markets.len(), updated, "Refreshed last traded prices");
                tokio::select! {
                    () = shutdown.cancelled() => return,
                    () = tokio::time::sleep(poll_interval) => {}
                }
            }
            Err(e) => {
                warn!(
                    error = %e,
                    markets = markets.len(),
                    backoff_ms = error_backoff.as_millis() as u64,
                    "Last traded price refresh failed"
                );
                tokio::select! {
                    () = shutdown.cancelled() => return,
                    () = tokio::time::sleep(error_backoff) => {}
                }
            }
        }
    }
}

impl<S: MarketDataSource> TrackerInner<S> {
    fn books_due_for_refresh(
        &self,
        now: Instant,
        stale_after: Duration,
        min_interval: Duration,
    ) -> Vec<(MarketId, SharedBook)> {
        let mut due: Vec<(MarketId, SharedBook)> = self
            .slots
            .iter()
            .filter_map(|entry| {
                let (book, _) = entry.active_parts()?;
                book.read()
                    .needs_trade_refresh(now, stale_after, min_interval)
                    .then(|| (entry.key().clone(), book.clone()))
            })
            .collect();
        due.sort_by(|a, b| a.0.cmp(&b.0));
        due
    }
}
