//! Connection manager settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timers and limits for the connection manager.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// Interval between server heartbeats pushed to every connection.
    pub heartbeat_interval_ms: u64,
    /// Interval between stale-connection sweeps.
    pub reap_interval_ms: u64,
    /// Inactivity window after which a connection is evicted.
    pub stale_threshold_ms: u64,
    /// Upper bound on a single send before it counts as failed.
    pub send_timeout_ms: u64,
    /// Delay before a crashed background loop is relaunched.
    pub restart_delay_ms: u64,
    /// Outbound frames buffered per connection.
    pub send_queue_capacity: usize,
    /// Optional cap on topics a single connection may hold.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_topics_per_connection: Option<usize>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 30_000,
            reap_interval_ms: 300_000,
            stale_threshold_ms: 600_000,
            send_timeout_ms: 5_000,
            restart_delay_ms: 1_000,
            send_queue_capacity: 256,
            max_topics_per_connection: None,
        }
    }
}

impl ConnectionSettings {
    /// Heartbeat interval as a [`Duration`].
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Reaper interval as a [`Duration`].
    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms)
    }

    /// Staleness window as a [`Duration`].
    pub fn stale_threshold(&self) -> Duration {
        Duration::from_millis(self.stale_threshold_ms)
    }

    /// Per-send timeout as a [`Duration`].
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Supervisor restart delay as a [`Duration`].
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}
