//! Splits decoded transport events into per-stream channels.

use crate::error::{SourceError, SourceResult};
use obsync_core::{DiffEvent, SnapshotEvent, StreamEvent, TradeEvent};
use tokio::sync::{mpsc, Mutex as TokioMutex};

struct Stream<T> {
    tx: mpsc::UnboundedSender<T>,
    rx: TokioMutex<mpsc::UnboundedReceiver<T>>,
}

impl<T: Send> Stream<T> {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: TokioMutex::new(rx),
        }
    }

    /// Pump buffered and future events into `output` until it closes.
    ///
    /// One forwarder per stream at a time; a second caller waits for the
    /// first to be dropped. Events stay buffered while nobody forwards.
    async fn forward(&self, output: &mpsc::UnboundedSender<T>, name: &'static str) -> SourceResult<()> {
        let mut rx = self.rx.lock().await;
        loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else {
                        return Ok(());
                    };
                    if output.send(event).is_err() {
                        return Err(SourceError::OutputClosed(name));
                    }
                }
                () = output.closed() => {
                    return Err(SourceError::OutputClosed(name));
                }
            }
        }
    }
}

/// Per-stream buffers between one transport and the tracker's listeners.
pub struct EventFanout {
    diffs: Stream<DiffEvent>,
    snapshots: Stream<SnapshotEvent>,
    trades: Stream<TradeEvent>,
}

impl Default for EventFanout {
    fn default() -> Self {
        Self::new()
    }
}

impl EventFanout {
    pub fn new() -> Self {
        Self {
            diffs: Stream::new(),
            snapshots: Stream::new(),
            trades: Stream::new(),
        }
    }

    /// Route one decoded event to its stream.
    pub fn dispatch(&self, event: StreamEvent) {
        // Receivers live as long as `self`, so sends cannot fail.
        match event {
            StreamEvent::Diff(e) => {
                let _ = self.diffs.tx.send(e);
            }
            StreamEvent::Snapshot(e) => {
                let _ = self.snapshots.tx.send(e);
            }
            StreamEvent::Trade(e) => {
                let _ = self.trades.tx.send(e);
            }
        }
    }

    pub async fn forward_diffs(&self, output: mpsc::UnboundedSender<DiffEvent>) -> SourceResult<()> {
        self.diffs.forward(&output, "diff").await
    }

    pub async fn forward_snapshots(
        &self,
        output: mpsc::UnboundedSender<SnapshotEvent>,
    ) -> SourceResult<()> {
        self.snapshots.forward(&output, "snapshot").await
    }

    pub async fn forward_trades(&self, output: mpsc::UnboundedSender<TradeEvent>) -> SourceResult<()> {
        self.trades.forward(&output, "trade").await
    }
}
