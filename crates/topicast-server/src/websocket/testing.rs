//! Test doubles for transports and connections.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use super::connection::{ClientConnection, Connection, ConnectionOptions};
use super::errors::TransportError;
use super::transport::Transport;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Behaviour {
    Record,
    Fail,
    Stall,
}

/// Inspection handle kept by the test after the transport is moved into a
/// connection.
#[derive(Clone, Default)]
pub(crate) struct Probe {
    sent: Arc<Mutex<Vec<Bytes>>>,
    closed: Arc<AtomicBool>,
}

impl Probe {
    pub(crate) fn messages(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .collect()
    }

    pub(crate) fn json(&self) -> Vec<serde_json::Value> {
        self.sent
            .lock()
            .iter()
            .filter_map(|b| serde_json::from_slice(b).ok())
            .collect()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct FakeTransport {
    id: String,
    behaviour: Behaviour,
    probe: Probe,
}

#[async_trait]
impl Transport for FakeTransport {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send(&self, payload: Bytes) -> Result<(), TransportError> {
        match self.behaviour {
            Behaviour::Record => {
                self.probe.sent.lock().push(payload);
                Ok(())
            }
            Behaviour::Fail => Err(TransportError::Closed),
            Behaviour::Stall => std::future::pending().await,
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.probe.closed.store(true, Ordering::SeqCst);
        match self.behaviour {
            Behaviour::Fail => Err(TransportError::Closed),
            _ => Ok(()),
        }
    }
}

fn fake(id: &str, behaviour: Behaviour) -> (Box<dyn Transport>, Probe) {
    let probe = Probe::default();
    let transport = FakeTransport {
        id: id.to_owned(),
        behaviour,
        probe: probe.clone(),
    };
    (Box::new(transport), probe)
}

/// Transport that records every payload.
pub(crate) fn recording(id: &str) -> (Box<dyn Transport>, Probe) {
    fake(id, Behaviour::Record)
}

/// Transport whose sends and closes always fail.
pub(crate) fn failing(id: &str) -> (Box<dyn Transport>, Probe) {
    fake(id, Behaviour::Fail)
}

/// Transport whose sends never complete.
pub(crate) fn stalling(id: &str) -> Box<dyn Transport> {
    fake(id, Behaviour::Stall).0
}

/// Connected handle on a recording transport, subscribed to `topics`.
pub(crate) fn subscribed(client_id: &str, topics: &[&str]) -> (Arc<ClientConnection>, Probe) {
    let (transport, probe) = recording(&format!("{client_id}-t"));
    let conn = ClientConnection::new(client_id, transport, ConnectionOptions::default());
    for topic in topics {
        conn.subscribe(topic).unwrap();
    }
    (Arc::new(conn), probe)
}
