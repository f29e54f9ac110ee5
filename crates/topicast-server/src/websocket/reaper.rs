//! Periodic eviction of idle connections.

use std::sync::Weak;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::manager::ConnectionManager;

/// Sweep the registry for stale handles each `interval`.
///
/// Returns when `cancel` fires or the manager has been dropped.
pub async fn run_reaper(
    manager: Weak<ConnectionManager>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let _ = ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(manager) = manager.upgrade() else {
                    return;
                };
                let evicted = manager.reap_stale().await;
                if evicted > 0 {
                    debug!(evicted, "reaper sweep");
                }
            }
            () = cancel.cancelled() => return,
        }
    }
}
