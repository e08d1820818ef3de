//! Tracker readiness signal.
//!
//! Raised once every configured market is active. Dynamic adds and the
//! trade-price fallback wait on it.

use tokio::sync::watch;
use tracing::info;

/// Ready flag broadcast over a watch channel.
#[derive(Debug)]
pub struct ReadySignal {
    tx: watch::Sender<bool>,
}

impl Default for ReadySignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadySignal {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn set_ready(&self) {
        let changed = self.tx.send_if_modified(|ready| !std::mem::replace(ready, true));
        if changed {
            info!("Tracker ready");
        }
    }

    pub fn clear(&self) {
        self.tx.send_if_modified(|ready| std::mem::replace(ready, false));
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the signal is raised (immediately if it already is).
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|ready| *ready).await;
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}
