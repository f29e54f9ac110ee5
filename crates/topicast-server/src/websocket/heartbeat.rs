//! Periodic server → client heartbeat.

use std::sync::Weak;
use std::time::Duration;

use metrics::counter;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::manager::ConnectionManager;
use crate::metrics::WS_HEARTBEATS_TOTAL;

/// Push a `heartbeat` frame to every connected client each `interval`.
///
/// Returns when `cancel` fires or the manager has been dropped.
pub async fn run_heartbeat(
    manager: Weak<ConnectionManager>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick fires immediately
    let _ = ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(manager) = manager.upgrade() else {
                    return;
                };
                let delivered = manager.send_heartbeat().await;
                counter!(WS_HEARTBEATS_TOTAL).increment(1);
                debug!(delivered, "heartbeat sent");
            }
            () = cancel.cancelled() => return,
        }
    }
}
