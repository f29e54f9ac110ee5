//! Error types for connections, transports and the control protocol.

use std::time::Duration;

use thiserror::Error;

/// Failure of the underlying byte-stream transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The peer or the writer task is gone.
    #[error("transport closed")]
    Closed,
    /// The write did not complete within the send deadline.
    #[error("send timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors returned by handle-level operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// `send` on a handle with no live transport.
    #[error("client {client_id} is not connected")]
    NotConnected {
        /// Client the send was addressed to.
        client_id: String,
    },
    /// The transport write failed or timed out.
    #[error("write failed: {0}")]
    TransportWrite(#[source] TransportError),
    /// Closing the transport failed.
    #[error("close failed: {0}")]
    TransportClose(#[source] TransportError),
    /// The connection already holds the configured maximum of topics.
    #[error("topic limit of {limit} reached")]
    TopicLimit {
        /// Configured per-connection maximum.
        limit: usize,
    },
}

/// An inbound frame that is not a recognised control message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Not JSON, not an object, or missing/invalid fields.
    #[error("invalid control message: {0}")]
    InvalidControlMessage(String),
    /// Well-formed JSON with a `type` this server does not handle.
    #[error("unknown control message type: {0}")]
    UnknownType(String),
}
