//! Keeps data source listeners running.

use obsync_ws::SourceResult;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Run `listen` until shutdown, restarting it after recoverable errors.
///
/// A fatal error or a clean return ends supervision of that stream.
pub(crate) async fn supervise_listener<F, Fut>(
    stream: &'static str,
    backoff: Duration,
    shutdown: CancellationToken,
    listen: F,
) where
    F: Fn() -> Fut + Send,
    Fut: Future<Output = SourceResult<()>> + Send,
{
    let mut restarts: u64 = 0;
    loop {
        let result = tokio::select! {
            () = shutdown.cancelled() => return,
            result = listen() => result,
        };

        match result {
            Ok(()) => {
                warn!(stream, "Listener returned, no longer supervised");
                return;
            }
            Err(e) if e.is_fatal() => {
                error!(stream, error = %e, "Listener failed fatally");
                return;
            }
            Err(e) => {
                restarts += 1;
                error!(
                    stream,
                    error = %e,
                    restarts,
                    backoff_ms = backoff.as_millis() as u64,
                    "Listener failed, restarting"
                );
                tokio::select! {
                    () = shutdown.cancelled() => return,
                    () = tokio::time::sleep(backoff) => {}
                }
                info!(stream, "Restarting listener");
            }
        }
    }
}
