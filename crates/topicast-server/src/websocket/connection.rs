//! Connection handle: one logical client, its current transport and its
//! topic subscriptions.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use topicast_settings::ConnectionSettings;
use tracing::{debug, warn};

use super::errors::{ConnectionError, TransportError};
use super::transport::Transport;

/// Capability set every registered connection provides.
///
/// The manager only talks to connections through this trait, so real
/// WebSocket clients and test doubles are interchangeable.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Stable identifier that survives reconnects.
    fn client_id(&self) -> &str;

    /// Deliver `payload` as one message frame.
    async fn send(&self, payload: Bytes) -> Result<(), ConnectionError>;

    /// Whether a live transport is attached.
    fn is_connected(&self) -> bool;

    /// Time of the last successful send or reconnect.
    fn last_activity(&self) -> DateTime<Utc>;

    /// Add `topic` to the subscription set. Subscribing twice is a no-op.
    fn subscribe(&self, topic: &str) -> Result<(), ConnectionError>;

    /// Remove `topic` from the subscription set. Absent topics are a no-op.
    fn unsubscribe(&self, topic: &str) -> Result<(), ConnectionError>;

    /// Snapshot of the subscribed topics.
    fn topics(&self) -> Vec<String>;

    /// Whether `topic` is in the subscription set (exact, case-sensitive).
    fn is_subscribed(&self, topic: &str) -> bool {
        self.topics().iter().any(|t| t == topic)
    }

    /// Install a new transport after a reconnect. The previous transport is
    /// closed; subscriptions are kept.
    async fn update_connection(&self, transport: Box<dyn Transport>);

    /// Mark disconnected and close the transport, if any.
    async fn disconnect(&self) -> Result<(), ConnectionError>;

    /// Close the handle's transport.
    async fn close(&self) -> Result<(), ConnectionError> {
        self.disconnect().await
    }

    /// Disconnect only if `transport_id` is still the installed transport.
    ///
    /// Returns `false` when a newer transport has replaced it, in which case
    /// nothing is touched.
    async fn release(&self, transport_id: &str) -> Result<bool, ConnectionError>;
}

/// Per-handle tuning.
#[derive(Clone, Debug)]
pub struct ConnectionOptions {
    /// Deadline for a single transport write.
    pub send_timeout: Duration,
    /// Optional cap on subscribed topics.
    pub max_topics: Option<usize>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(5),
            max_topics: None,
        }
    }
}

impl From<&ConnectionSettings> for ConnectionOptions {
    fn from(settings: &ConnectionSettings) -> Self {
        Self {
            send_timeout: settings.send_timeout(),
            max_topics: settings.max_topics_per_connection,
        }
    }
}

#[derive(Debug)]
struct HandleState {
    connected: bool,
    last_activity: DateTime<Utc>,
    topics: HashSet<String>,
}

/// Production connection handle.
///
/// The transport sits behind an async mutex so sends, swaps and closes on the
/// same client are serialized and per-client message order is preserved.
/// The remaining fields sit behind a short sync lock that is never held
/// across an await. Lock order inside a handle: transport, then state.
pub struct ClientConnection {
    client_id: String,
    transport: tokio::sync::Mutex<Option<Box<dyn Transport>>>,
    state: Mutex<HandleState>,
    options: ConnectionOptions,
}

impl ClientConnection {
    /// Create a connected handle around `transport`.
    pub fn new(
        client_id: impl Into<String>,
        transport: Box<dyn Transport>,
        options: ConnectionOptions,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            transport: tokio::sync::Mutex::new(Some(transport)),
            state: Mutex::new(HandleState {
                connected: true,
                last_activity: Utc::now(),
                topics: HashSet::new(),
            }),
            options,
        }
    }

    /// Number of subscribed topics.
    pub fn topic_count(&self) -> usize {
        self.state.lock().topics.len()
    }

    #[cfg(test)]
    pub(crate) fn backdate(&self, by: Duration) {
        let by = chrono::Duration::from_std(by).unwrap();
        self.state.lock().last_activity = Utc::now() - by;
    }
}

#[async_trait]
impl Connection for ClientConnection {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn send(&self, payload: Bytes) -> Result<(), ConnectionError> {
        let slot = self.transport.lock().await;
        let connected = self.state.lock().connected;
        let Some(transport) = slot.as_ref().filter(|_| connected) else {
            return Err(ConnectionError::NotConnected {
                client_id: self.client_id.clone(),
            });
        };

        match tokio::time::timeout(self.options.send_timeout, transport.send(payload)).await {
            Ok(Ok(())) => {
                self.state.lock().last_activity = Utc::now();
                Ok(())
            }
            Ok(Err(e)) => Err(ConnectionError::TransportWrite(e)),
            Err(_) => Err(ConnectionError::TransportWrite(TransportError::Timeout(
                self.options.send_timeout,
            ))),
        }
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn last_activity(&self) -> DateTime<Utc> {
        self.state.lock().last_activity
    }

    fn subscribe(&self, topic: &str) -> Result<(), ConnectionError> {
        let mut state = self.state.lock();
        if state.topics.contains(topic) {
            return Ok(());
        }
        if let Some(limit) = self.options.max_topics {
            if state.topics.len() >= limit {
                return Err(ConnectionError::TopicLimit { limit });
            }
        }
        let _ = state.topics.insert(topic.to_owned());
        debug!(client_id = %self.client_id, topic, "subscribed");
        Ok(())
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), ConnectionError> {
        if self.state.lock().topics.remove(topic) {
            debug!(client_id = %self.client_id, topic, "unsubscribed");
        }
        Ok(())
    }

    fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.state.lock().topics.iter().cloned().collect();
        topics.sort_unstable();
        topics
    }

    fn is_subscribed(&self, topic: &str) -> bool {
        self.state.lock().topics.contains(topic)
    }

    async fn update_connection(&self, transport: Box<dyn Transport>) {
        let mut slot = self.transport.lock().await;
        if let Some(old) = slot.take() {
            if let Err(e) = old.close().await {
                warn!(client_id = %self.client_id, error = %e, "failed to close replaced transport");
            }
        }
        *slot = Some(transport);
        let mut state = self.state.lock();
        state.connected = true;
        state.last_activity = Utc::now();
    }

    async fn disconnect(&self) -> Result<(), ConnectionError> {
        let mut slot = self.transport.lock().await;
        self.state.lock().connected = false;
        match slot.take() {
            Some(transport) => transport
                .close()
                .await
                .map_err(ConnectionError::TransportClose),
            None => Ok(()),
        }
    }

    async fn release(&self, transport_id: &str) -> Result<bool, ConnectionError> {
        let mut slot = self.transport.lock().await;
        if slot.as_ref().is_none_or(|t| t.id() != transport_id) {
            return Ok(false);
        }
        self.state.lock().connected = false;
        if let Some(transport) = slot.take() {
            transport
                .close()
                .await
                .map_err(ConnectionError::TransportClose)?;
        }
        Ok(true)
    }
}
