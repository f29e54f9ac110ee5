//! Connection registry and topic fan-out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use metrics::counter;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use topicast_settings::ConnectionSettings;
use tracing::{debug, info, warn};

use super::connection::Connection;
use super::heartbeat::run_heartbeat;
use super::protocol::ServerMessage;
use super::reaper::run_reaper;
use super::supervisor::supervise;
use crate::metrics::{WS_BROADCAST_FAILURES_TOTAL, WS_REAPED_TOTAL};

/// How long `shutdown` waits for the background loops to exit.
const TASK_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Floor for the loop periods; `tokio::time::interval` panics on zero.
const MIN_LOOP_PERIOD: Duration = Duration::from_millis(10);

/// Timers driving the background loops.
#[derive(Clone, Debug)]
pub struct ManagerConfig {
    /// Interval between heartbeats pushed to every connection.
    pub heartbeat_interval: Duration,
    /// Interval between stale-connection sweeps.
    pub reap_interval: Duration,
    /// Inactivity window after which a connection is evicted.
    pub stale_threshold: Duration,
    /// Delay before a crashed loop is relaunched.
    pub restart_delay: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            reap_interval: Duration::from_secs(5 * 60),
            stale_threshold: Duration::from_secs(10 * 60),
            restart_delay: Duration::from_secs(1),
        }
    }
}

impl From<&ConnectionSettings> for ManagerConfig {
    fn from(settings: &ConnectionSettings) -> Self {
        Self {
            heartbeat_interval: settings.heartbeat_interval(),
            reap_interval: settings.reap_interval(),
            stale_threshold: settings.stale_threshold(),
            restart_delay: settings.restart_delay(),
        }
    }
}

impl ManagerConfig {
    /// Raise loop periods below [`MIN_LOOP_PERIOD`] to the floor.
    fn clamped(mut self) -> Self {
        for (name, period) in [
            ("heartbeat_interval", &mut self.heartbeat_interval),
            ("reap_interval", &mut self.reap_interval),
            ("restart_delay", &mut self.restart_delay),
        ] {
            if *period < MIN_LOOP_PERIOD {
                warn!(name, requested = ?*period, floor = ?MIN_LOOP_PERIOD, "loop period too small, clamping");
                *period = MIN_LOOP_PERIOD;
            }
        }
        self
    }
}

/// Owns every connection handle, keyed by client id.
///
/// The map sits behind a reader/writer lock: broadcasts take the read side
/// and may run concurrently; add, remove, reap and shutdown take the write
/// side. Handle locks are only ever taken after the registry lock.
pub struct ConnectionManager {
    clients: RwLock<HashMap<String, Arc<dyn Connection>>>,
    config: ManagerConfig,
    shutdown: CancellationToken,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Create an empty manager. `shutdown` stops the background loops when
    /// cancelled. Loop periods below 10ms are raised to 10ms.
    pub fn new(config: ManagerConfig, shutdown: CancellationToken) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            config: config.clamped(),
            shutdown,
            tasks: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Manager configuration.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Spawn the supervised heartbeat and reaper loops. Calling it again
    /// while they run is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() || self.shutdown.is_cancelled() {
            return;
        }

        let weak = Arc::downgrade(self);
        let cancel = self.shutdown.clone();
        let interval = self.config.heartbeat_interval;
        tasks.push(tokio::spawn(supervise(
            "heartbeat",
            self.config.restart_delay,
            self.shutdown.clone(),
            move || run_heartbeat(weak.clone(), interval, cancel.clone()),
        )));

        let weak = Arc::downgrade(self);
        let cancel = self.shutdown.clone();
        let interval = self.config.reap_interval;
        tasks.push(tokio::spawn(supervise(
            "reaper",
            self.config.restart_delay,
            self.shutdown.clone(),
            move || run_reaper(weak.clone(), interval, cancel.clone()),
        )));

        info!(
            heartbeat_secs = self.config.heartbeat_interval.as_secs(),
            reap_secs = self.config.reap_interval.as_secs(),
            stale_secs = self.config.stale_threshold.as_secs(),
            "connection manager started"
        );
    }

    /// Register `handle` under `client_id`, replacing any previous handle.
    ///
    /// A replaced handle is disconnected so its transport is not leaked.
    pub async fn add_client(&self, client_id: &str, handle: Arc<dyn Connection>) {
        let previous = {
            let mut clients = self.clients.write().await;
            clients.insert(client_id.to_owned(), Arc::clone(&handle))
        };
        debug!(client_id, "client registered");

        if let Some(previous) = previous.filter(|p| !Arc::ptr_eq(p, &handle)) {
            info!(client_id, "replacing existing handle");
            if let Err(e) = previous.disconnect().await {
                warn!(client_id, error = %e, "failed to close superseded connection");
            }
        }
    }

    /// Remove the handle for `client_id` without closing it.
    pub async fn remove_client(&self, client_id: &str) -> Option<Arc<dyn Connection>> {
        let removed = self.clients.write().await.remove(client_id);
        if removed.is_some() {
            debug!(client_id, "client removed");
        }
        removed
    }

    /// Remove `client_id` only while `handle` is the registered handle.
    ///
    /// A session ending after its client re-registered leaves the newer
    /// handle alone.
    pub async fn remove_if_current(&self, client_id: &str, handle: &Arc<dyn Connection>) -> bool {
        let mut clients = self.clients.write().await;
        if !clients.get(client_id).is_some_and(|c| Arc::ptr_eq(c, handle)) {
            return false;
        }
        let _ = clients.remove(client_id);
        debug!(client_id, "client removed");
        true
    }

    /// Whether a handle is registered for `client_id`.
    pub async fn client_exists(&self, client_id: &str) -> bool {
        self.clients.read().await.contains_key(client_id)
    }

    /// Look up the handle for `client_id`.
    pub async fn get_client(&self, client_id: &str) -> Option<Arc<dyn Connection>> {
        self.clients.read().await.get(client_id).cloned()
    }

    /// Number of registered handles, connected or not.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Deliver `payload` to every connected handle. Returns the number of
    /// successful deliveries.
    pub async fn broadcast(&self, payload: Bytes) -> usize {
        self.fan_out(None, payload).await
    }

    /// Deliver `payload` to every connected handle subscribed to `topic`.
    /// Returns the number of successful deliveries; zero subscribers is not
    /// an error.
    pub async fn broadcast_to_topic(&self, topic: &str, payload: Bytes) -> usize {
        self.fan_out(Some(topic), payload).await
    }

    /// Push one `heartbeat` frame to every connected handle.
    pub async fn send_heartbeat(&self) -> usize {
        match ServerMessage::heartbeat().to_bytes() {
            Ok(payload) => self.broadcast(payload).await,
            Err(e) => {
                warn!(error = %e, "failed to serialize heartbeat");
                0
            }
        }
    }

    /// Best-effort fan-out. A failing recipient is logged and skipped.
    async fn fan_out(&self, topic: Option<&str>, payload: Bytes) -> usize {
        let clients = self.clients.read().await;
        let recipients: Vec<&Arc<dyn Connection>> = clients
            .values()
            .filter(|c| c.is_connected() && topic.is_none_or(|t| c.is_subscribed(t)))
            .collect();
        let attempted = recipients.len();

        let results = join_all(recipients.into_iter().map(|conn| {
            let payload = payload.clone();
            async move { (conn, conn.send(payload).await) }
        }))
        .await;

        let label = topic.unwrap_or("*");
        let mut delivered = 0;
        for (conn, result) in results {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    counter!(WS_BROADCAST_FAILURES_TOTAL).increment(1);
                    warn!(client_id = %conn.client_id(), topic = label, error = %e, "failed to deliver message");
                }
            }
        }
        debug!(topic = label, attempted, delivered, "broadcast");
        delivered
    }

    /// Evict handles idle for longer than the stale threshold.
    pub async fn reap_stale(&self) -> usize {
        self.reap_stale_at(Utc::now()).await
    }

    /// Evict handles whose last activity is older than
    /// `now - stale_threshold`. Returns the number evicted.
    pub async fn reap_stale_at(&self, now: DateTime<Utc>) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(self.config.stale_threshold)
            .ok()
            .and_then(|threshold| now.checked_sub_signed(threshold))
        else {
            return 0;
        };

        let mut clients = self.clients.write().await;
        let stale: Vec<String> = clients
            .iter()
            .filter(|(_, conn)| conn.last_activity() < cutoff)
            .map(|(id, _)| id.clone())
            .collect();

        for client_id in &stale {
            let Some(conn) = clients.get(client_id) else {
                continue;
            };
            if let Err(e) = conn.disconnect().await {
                warn!(client_id = %client_id, error = %e, "failed to close stale connection");
            }
            let _ = clients.remove(client_id);
            counter!(WS_REAPED_TOTAL).increment(1);
            info!(client_id = %client_id, "evicted stale connection");
        }
        stale.len()
    }

    /// Stop the background loops, disconnect every handle and clear the
    /// registry. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let count = {
            let mut clients = self.clients.write().await;
            for (client_id, conn) in clients.iter() {
                if let Err(e) = conn.disconnect().await {
                    warn!(client_id = %client_id, error = %e, "failed to close connection during shutdown");
                }
            }
            let count = clients.len();
            *clients = HashMap::new();
            count
        };

        let tasks = std::mem::take(&mut *self.tasks.lock());
        if !tasks.is_empty()
            && tokio::time::timeout(TASK_DRAIN_TIMEOUT, join_all(tasks))
                .await
                .is_err()
        {
            warn!("background loops did not stop within {TASK_DRAIN_TIMEOUT:?}");
        }
        info!(closed = count, "connection manager shut down");
    }

    /// Whether `shutdown` has been initiated.
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
