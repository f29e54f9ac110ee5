//! Outbound transport: the send/close capability a connection handle owns.
//!
//! The production [`WsTransport`] is the sending half of a bounded channel.
//! A per-connection writer task ([`run_writer`]) owns the WebSocket sink and
//! drains the channel, so callers never touch the socket directly.

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use axum::extract::ws::Message;
use bytes::Bytes;
use futures::{Sink, SinkExt};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use super::errors::TransportError;

/// Byte-stream capability owned by a connection handle.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Identifier distinguishing this physical connection from earlier ones
    /// for the same client.
    fn id(&self) -> &str;

    /// Write `payload` as a single message frame.
    async fn send(&self, payload: Bytes) -> Result<(), TransportError>;

    /// Close the underlying connection.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Item consumed by the writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// One message frame.
    Frame(Bytes),
    /// Send a Close frame and stop.
    Close,
}

/// Channel-backed WebSocket transport.
pub struct WsTransport {
    id: String,
    tx: mpsc::Sender<Outbound>,
    closed: AtomicBool,
}

impl WsTransport {
    /// Create a transport and the receiver its writer task drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let transport = Self {
            id: Uuid::now_v7().to_string(),
            tx,
            closed: AtomicBool::new(false),
        };
        (transport, rx)
    }
}

#[async_trait]
impl Transport for WsTransport {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send(&self, payload: Bytes) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        // Blocks while the queue is full; the handle bounds this with its
        // send timeout.
        self.tx
            .send(Outbound::Frame(payload))
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        match self.tx.try_send(Outbound::Close) {
            // A gone writer means the socket is already closed.
            Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                let tx = self.tx.clone();
                let _ = tokio::spawn(async move {
                    let _ = tx.send(Outbound::Close).await;
                });
                Ok(())
            }
        }
    }
}

/// Convert a payload into a WebSocket frame: UTF-8 travels as text,
/// anything else as binary.
pub fn to_ws_message(payload: Bytes) -> Message {
    match std::str::from_utf8(&payload) {
        Ok(text) => Message::Text(text.into()),
        Err(_) => Message::Binary(payload),
    }
}

/// Forward queued frames to the socket until the queue closes, a Close is
/// requested, or the socket rejects a write.
pub async fn run_writer<S>(mut sink: S, mut rx: mpsc::Receiver<Outbound>)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    while let Some(item) = rx.recv().await {
        match item {
            Outbound::Frame(payload) => {
                if let Err(e) = sink.send(to_ws_message(payload)).await {
                    debug!(error = %e, "websocket write failed, stopping writer");
                    return;
                }
            }
            Outbound::Close => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }
    let _ = sink.close().await;
}
