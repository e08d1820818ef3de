//! The tracker: market lifecycle and task orchestration.

use crate::config::TrackerConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::fallback::run_trade_refresh;
use crate::ready::ReadySignal;
use crate::router::{run_diff_router, run_snapshot_router, run_trade_router};
use crate::slot::{MarketSlot, WorkerHandle};
use crate::supervisor::supervise_listener;
use crate::worker::MarketWorker;
use dashmap::DashMap;
use obsync_book::{BookError, BookSnapshot, MarketBook, StalenessPolicy};
use obsync_core::{MarketId, MarketPhase, SnapshotEvent};
use obsync_telemetry::{MetricsSnapshot, TelemetryResult, TrackerMetrics};
use obsync_ws::MarketDataSource;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Tasks of one start/stop cycle.
struct RunState {
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

pub(crate) struct TrackerInner<S: MarketDataSource> {
    pub(crate) config: TrackerConfig,
    pub(crate) policy: StalenessPolicy,
    pub(crate) source: Arc<S>,
    pub(crate) slots: DashMap<MarketId, MarketSlot>,
    pub(crate) metrics: Arc<TrackerMetrics>,
    pub(crate) ready: ReadySignal,
    workers: Mutex<HashMap<MarketId, WorkerHandle>>,
    /// Serializes add, remove and startup activation.
    lifecycle: TokioMutex<()>,
    run: Mutex<Option<RunState>>,
}

impl<S: MarketDataSource> TrackerInner<S> {
    fn shutdown_token(&self) -> Option<CancellationToken> {
        self.run.lock().as_ref().map(|run| run.shutdown.clone())
    }

    /// Make an initializing market active and start its worker.
    ///
    /// Book, queue and phase flip under the slot lock, so a concurrent diff
    /// either lands in the pending buffer handed to the worker or in the
    /// queue behind it. Caller holds the lifecycle lock.
    fn activate(
        &self,
        market: &MarketId,
        snapshot: SnapshotEvent,
        shutdown: &CancellationToken,
    ) -> TrackerResult<()> {
        if snapshot.market != *market {
            return Err(BookError::MarketMismatch {
                expected: market.clone(),
                got: snapshot.market,
            }
            .into());
        }
        let book = MarketBook::from_snapshot(&snapshot)?.into_shared();
        let (tx, rx) = mpsc::unbounded_channel();

        let pending = {
            let Some(mut slot) = self.slots.get_mut(market) else {
                return Err(TrackerError::NotInitializing(market.clone()));
            };
            if slot.phase != MarketPhase::Initializing {
                return Err(TrackerError::NotInitializing(market.clone()));
            }
            let pending = slot.pending.take();
            slot.book = Some(book.clone());
            slot.queue = Some(tx);
            slot.phase = MarketPhase::Active;
            pending
        };

        info!(
            market = %market,
            sequence = snapshot.sequence,
            bids = snapshot.bids.len(),
            asks = snapshot.asks.len(),
            pending = pending.len(),
            "Market active"
        );

        let cancel = shutdown.child_token();
        let worker = MarketWorker::new(
            market.clone(),
            book,
            rx,
            pending,
            self.config.recent_diff_window,
            self.policy,
            self.metrics.clone(),
            self.config.worker_error_backoff(),
            cancel.clone(),
        );
        let join = tokio::spawn(worker.run());
        self.workers
            .lock()
            .insert(market.clone(), WorkerHandle { cancel, join });
        Ok(())
    }

    /// Undo a failed add. Caller holds the lifecycle lock.
    fn discard(&self, market: &MarketId) {
        self.slots.remove(market);
        self.metrics.remove_market(market);
    }

    /// Fetch and activate every configured market, then raise ready.
    async fn initialize_markets(self: Arc<Self>, shutdown: CancellationToken) {
        let backoff = self.config.worker_error_backoff();
        let total = self.config.markets.len();

        for (i, market) in self.config.markets.iter().enumerate() {
            loop {
                let fetched = tokio::select! {
                    () = shutdown.cancelled() => return,
                    result = self.source.get_initial_book(market) => result,
                };

                let result = match fetched {
                    Ok(snapshot) => {
                        let _guard = self.lifecycle.lock().await;
                        self.activate(market, snapshot, &shutdown)
                    }
                    Err(e) => Err(e.into()),
                };

                match result {
                    Ok(()) => break,
                    Err(e) => {
                        error!(
                            market = %market,
                            error = %e,
                            backoff_ms = backoff.as_millis() as u64,
                            "Initial book fetch failed, retrying"
                        );
                        tokio::select! {
                            () = shutdown.cancelled() => return,
                            () = tokio::time::sleep(backoff) => {}
                        }
                    }
                }
            }

            if i + 1 < total {
                tokio::select! {
                    () = shutdown.cancelled() => return,
                    () = tokio::time::sleep(self.config.init_delay()) => {}
                }
            }
        }

        info!(markets = total, "All order books initialized");
        self.ready.set_ready();
    }
}

/// Keeps one synchronized book per tracked market.
///
/// Configured markets are initialized by `start`; further markets are
/// added and removed at runtime. Dropping the tracker cancels its tasks;
/// `stop` also waits for them.
pub struct Tracker<S: MarketDataSource> {
    inner: Arc<TrackerInner<S>>,
}

impl<S: MarketDataSource> Tracker<S> {
    pub fn new(source: Arc<S>, config: TrackerConfig) -> TrackerResult<Self> {
        config.validate()?;
        let metrics = Arc::new(TrackerMetrics::new(config.metrics.clone())?);

        Ok(Self {
            inner: Arc::new(TrackerInner {
                policy: config.staleness_policy(),
                config,
                source,
                slots: DashMap::new(),
                metrics,
                ready: ReadySignal::new(),
                workers: Mutex::new(HashMap::new()),
                lifecycle: TokioMutex::new(()),
                run: Mutex::new(None),
            }),
        })
    }

    /// Spawn listeners, routers, startup initialization and the trade
    /// fallback. Returns immediately; use `wait_ready` to await startup.
    pub fn start(&self) -> TrackerResult<()> {
        let mut run = self.inner.run.lock();
        if run.is_some() {
            return Err(TrackerError::AlreadyStarted);
        }

        let shutdown = CancellationToken::new();
        self.inner.metrics.mark_started();

        // Registered before any listener runs so early diffs are buffered.
        for market in &self.inner.config.markets {
            self.inner.slots.insert(
                market.clone(),
                MarketSlot::initializing(self.inner.config.pending_buffer_capacity),
            );
        }

        let (diff_tx, diff_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = mpsc::unbounded_channel();
        let (trade_tx, trade_rx) = mpsc::unbounded_channel();
        let backoff = self.inner.config.listener_backoff();
        let mut tasks = Vec::new();

        let source = self.inner.source.clone();
        tasks.push(tokio::spawn(supervise_listener(
            "diffs",
            backoff,
            shutdown.clone(),
            move || {
                let source = source.clone();
                let output = diff_tx.clone();
                async move { source.listen_for_diffs(output).await }
            },
        )));

        let source = self.inner.source.clone();
        tasks.push(tokio::spawn(supervise_listener(
            "snapshots",
            backoff,
            shutdown.clone(),
            move || {
                let source = source.clone();
                let output = snapshot_tx.clone();
                async move { source.listen_for_snapshots(output).await }
            },
        )));

        let source = self.inner.source.clone();
        tasks.push(tokio::spawn(supervise_listener(
            "trades",
            backoff,
            shutdown.clone(),
            move || {
                let source = source.clone();
                let output = trade_tx.clone();
                async move { source.listen_for_trades(output).await }
            },
        )));

        let source = self.inner.source.clone();
        tasks.push(tokio::spawn(supervise_listener(
            "subscriptions",
            backoff,
            shutdown.clone(),
            move || {
                let source = source.clone();
                async move { source.listen_for_subscriptions().await }
            },
        )));

        tasks.push(tokio::spawn(run_diff_router(
            self.inner.clone(),
            diff_rx,
            shutdown.clone(),
        )));
        tasks.push(tokio::spawn(run_snapshot_router(
            self.inner.clone(),
            snapshot_rx,
            shutdown.clone(),
        )));
        tasks.push(tokio::spawn(run_trade_router(
            self.inner.clone(),
            trade_rx,
            shutdown.clone(),
        )));
        tasks.push(tokio::spawn(
            self.inner.clone().initialize_markets(shutdown.clone()),
        ));
        if self.inner.config.trade_refresh.enabled {
            tasks.push(tokio::spawn(run_trade_refresh(
                self.inner.clone(),
                shutdown.clone(),
            )));
        }

        info!(
            markets = self.inner.config.markets.len(),
            tasks = tasks.len(),
            "Tracker started"
        );
        *run = Some(RunState { shutdown, tasks });
        Ok(())
    }

    /// Cancel every task, wait for all of them including market workers,
    /// and drop all per-market state. The tracker can be started again.
    pub async fn stop(&self) {
        let Some(run) = self.inner.run.lock().take() else {
            return;
        };
        run.shutdown.cancel();
        for task in run.tasks {
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!(error = %e, "Tracker task panicked");
                }
            }
        }

        // In-flight adds observe the cancellation and release the lock.
        let _guard = self.inner.lifecycle.lock().await;
        let workers: Vec<WorkerHandle> = self.inner.workers.lock().drain().map(|(_, w)| w).collect();
        for worker in workers {
            worker.shutdown().await;
        }

        let markets: Vec<MarketId> = self.inner.slots.iter().map(|e| e.key().clone()).collect();
        self.inner.slots.clear();
        for market in &markets {
            self.inner.metrics.remove_market(market);
        }
        self.inner.ready.clear();
        info!(markets = markets.len(), "Tracker stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.run.lock().is_some()
    }

    /// Start tracking a market at runtime.
    ///
    /// Waits for startup to finish, subscribes, fetches the initial book
    /// and activates the market. Diffs arriving meanwhile are buffered and
    /// applied first. Returns false, with no state left behind, if any
    /// step fails or the market is already tracked.
    pub async fn add_market(&self, market: MarketId) -> bool {
        let Some(shutdown) = self.inner.shutdown_token() else {
            warn!(market = %market, "Tracker not running, cannot add market");
            return false;
        };

        tokio::select! {
            () = shutdown.cancelled() => return false,
            () = self.inner.ready.wait() => {}
        }

        let _guard = self.inner.lifecycle.lock().await;
        if shutdown.is_cancelled() {
            return false;
        }
        if self.inner.slots.contains_key(&market) {
            warn!(market = %market, "Market already tracked");
            return false;
        }

        // Registered before subscribing so the first diffs are buffered.
        self.inner.slots.insert(
            market.clone(),
            MarketSlot::initializing(self.inner.config.pending_buffer_capacity),
        );

        let subscribed = tokio::select! {
            () = shutdown.cancelled() => {
                // The request may already have reached the source.
                info!(market = %market, "Tracker stopping, abandoning add");
                self.rollback_add(&market).await;
                return false;
            }
            ok = self.inner.source.subscribe_to_market(&market) => ok,
        };
        if !subscribed {
            warn!(market = %market, "Subscribe failed, market not added");
            self.inner.discard(&market);
            return false;
        }

        let fetched = tokio::select! {
            () = shutdown.cancelled() => {
                info!(market = %market, "Tracker stopping, abandoning add");
                self.rollback_add(&market).await;
                return false;
            }
            result = self.inner.source.get_initial_book(&market) => result,
        };

        let result = fetched
            .map_err(TrackerError::from)
            .and_then(|snapshot| self.inner.activate(&market, snapshot, &shutdown));

        match result {
            Ok(()) => {
                info!(market = %market, "Market added");
                true
            }
            Err(e) => {
                error!(market = %market, error = %e, "Failed to initialize market, rolling back");
                self.rollback_add(&market).await;
                false
            }
        }
    }

    /// Drop the half-added market and best-effort unsubscribe it.
    async fn rollback_add(&self, market: &MarketId) {
        self.inner.discard(market);
        if !self.inner.source.unsubscribe_from_market(market).await {
            warn!(market = %market, "Unsubscribe during rollback failed");
        }
    }

    /// Stop tracking an active market and drop all of its state.
    ///
    /// Returns false if the market is not active. An unsubscribe failure
    /// is logged and does not stop the cleanup.
    pub async fn remove_market(&self, market: &MarketId) -> bool {
        let _guard = self.inner.lifecycle.lock().await;

        {
            let Some(mut slot) = self.inner.slots.get_mut(market) else {
                warn!(market = %market, "Market not tracked, nothing to remove");
                return false;
            };
            if !slot.phase.is_active() {
                warn!(market = %market, phase = %slot.phase, "Market not active, cannot remove");
                return false;
            }
            slot.phase = MarketPhase::Removed;
            slot.queue = None;
        }

        let worker = self.inner.workers.lock().remove(market);
        if let Some(worker) = worker {
            worker.shutdown().await;
        }

        if !self.inner.source.unsubscribe_from_market(market).await {
            warn!(market = %market, "Unsubscribe failed, continuing removal");
        }

        self.inner.slots.remove(market);
        self.inner.metrics.remove_market(market);
        info!(market = %market, "Market removed");
        true
    }

    /// Current book of an active market.
    pub fn get_book_snapshot(&self, market: &MarketId) -> Option<BookSnapshot> {
        let slot = self.inner.slots.get(market)?;
        let (book, _) = slot.active_parts()?;
        let snapshot = book.read().snapshot();
        Some(snapshot)
    }

    /// Books of every active market.
    pub fn book_snapshots(&self) -> BTreeMap<MarketId, BookSnapshot> {
        self.inner
            .slots
            .iter()
            .filter_map(|entry| {
                let (book, _) = entry.active_parts()?;
                let snapshot = book.read().snapshot();
                Some((entry.key().clone(), snapshot))
            })
            .collect()
    }

    pub fn market_phase(&self, market: &MarketId) -> MarketPhase {
        self.inner
            .slots
            .get(market)
            .map_or(MarketPhase::Unregistered, |slot| slot.phase)
    }

    /// Active markets, sorted.
    pub fn tracked_markets(&self) -> Vec<MarketId> {
        let mut markets: Vec<MarketId> = self
            .inner
            .slots
            .iter()
            .filter(|entry| entry.phase.is_active())
            .map(|entry| entry.key().clone())
            .collect();
        markets.sort();
        markets
    }

    /// Whether any state exists for the market, in any phase.
    pub fn is_tracking(&self, market: &MarketId) -> bool {
        self.inner.slots.contains_key(market)
    }

    /// Diffs buffered for an initializing market.
    pub fn pending_len(&self, market: &MarketId) -> usize {
        self.inner
            .slots
            .get(market)
            .map_or(0, |slot| slot.pending.len())
    }

    pub fn has_worker(&self, market: &MarketId) -> bool {
        self.inner.workers.lock().contains_key(market)
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.is_ready()
    }

    pub async fn wait_ready(&self) {
        self.inner.ready.wait().await;
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub fn metrics_handle(&self) -> Arc<TrackerMetrics> {
        self.inner.metrics.clone()
    }

    /// Prometheus exposition text, if the exporter is enabled.
    pub fn prometheus_text(&self) -> Option<TelemetryResult<String>> {
        self.inner.metrics.prometheus_text()
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.inner.config
    }

    pub fn source(&self) -> &Arc<S> {
        &self.inner.source
    }
}

impl<S: MarketDataSource> Drop for Tracker<S> {
    fn drop(&mut self) {
        if let Some(run) = self.inner.run.lock().as_ref() {
            run.shutdown.cancel();
        }
    }
}
