//! Routing state of one market.

use obsync_book::{PendingEventBuffer, SharedBook};
use obsync_core::{BookMessage, MarketPhase};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Everything the routers need to know about a market.
///
/// `book` and `queue` are set together when the market becomes active;
/// `pending` only holds diffs while the market is initializing.
pub(crate) struct MarketSlot {
    pub(crate) phase: MarketPhase,
    pub(crate) book: Option<SharedBook>,
    pub(crate) queue: Option<mpsc::UnboundedSender<BookMessage>>,
    pub(crate) pending: PendingEventBuffer,
}

impl MarketSlot {
    pub(crate) fn initializing(pending_capacity: usize) -> Self {
        Self {
            phase: MarketPhase::Initializing,
            book: None,
            queue: None,
            pending: PendingEventBuffer::new(pending_capacity),
        }
    }

    /// Book and queue of an active market.
    pub(crate) fn active_parts(&self) -> Option<(&SharedBook, &mpsc::UnboundedSender<BookMessage>)> {
        if !self.phase.is_active() {
            return None;
        }
        self.book.as_ref().zip(self.queue.as_ref())
    }
}

/// A running per-market worker.
pub(crate) struct WorkerHandle {
    pub(crate) cancel: CancellationToken,
    pub(crate) join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Cancel the worker and wait for it to exit.
    pub(crate) async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            if e.is_panic() {
                tracing::error!(error = %e, "Market worker panicked");
            }
        }
    }
}
