//! JSON control protocol carried in text frames.
//!
//! Client → server: `subscribe`, `unsubscribe`, `get_topics`, `heartbeat`,
//! plus the literal text `ping`. Server → client: the matching acks, plus
//! unsolicited `connected` and `heartbeat` frames. Broadcast payloads are
//! not part of this protocol and pass through untouched.

use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::connection::Connection;
use super::errors::ProtocolError;

/// Literal keepalive request sent by browsers.
pub const PING: &str = "ping";
/// Literal keepalive reply.
pub const PONG: &str = "pong";

const KNOWN_TYPES: [&str; 4] = ["subscribe", "unsubscribe", "get_topics", "heartbeat"];

/// Control message sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Add a topic to the connection's subscription set.
    Subscribe {
        /// Topic name.
        topic: String,
    },
    /// Remove a topic from the subscription set.
    Unsubscribe {
        /// Topic name.
        topic: String,
    },
    /// List the current subscriptions.
    GetTopics,
    /// Client liveness probe.
    Heartbeat {
        /// Client clock, unix seconds.
        #[serde(default)]
        timestamp: i64,
    },
}

/// Message produced by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// First frame on every new connection.
    Connected {
        /// Identifier the client should present when reconnecting.
        client_id: String,
        /// Server clock, unix seconds.
        timestamp: i64,
    },
    /// Reply to `subscribe`.
    SubscribeAck {
        /// Topic from the request.
        topic: String,
        /// Whether the topic is now subscribed.
        success: bool,
        /// Failure reason.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Reply to `unsubscribe`.
    UnsubscribeAck {
        /// Topic from the request.
        topic: String,
        /// Whether the topic is no longer subscribed.
        success: bool,
        /// Failure reason.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Reply to `get_topics`.
    Topics {
        /// Current subscriptions.
        topics: Vec<String>,
    },
    /// Periodic server liveness probe.
    Heartbeat {
        /// Server clock, unix seconds.
        timestamp: i64,
    },
    /// Reply to a client `heartbeat`.
    HeartbeatAck {
        /// Server clock, unix seconds.
        timestamp: i64,
    },
}

impl ServerMessage {
    /// `connected` greeting stamped with the current time.
    pub fn connected(client_id: impl Into<String>) -> Self {
        Self::Connected {
            client_id: client_id.into(),
            timestamp: Utc::now().timestamp(),
        }
    }

    /// `heartbeat` probe stamped with the current time.
    pub fn heartbeat() -> Self {
        Self::Heartbeat {
            timestamp: Utc::now().timestamp(),
        }
    }

    /// Serialize to a frame payload.
    pub fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}

/// A parsed inbound text frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// The literal `ping` keepalive.
    Ping,
    /// A JSON control message.
    Control(ClientMessage),
}

/// Parse an inbound text frame.
pub fn parse_inbound(text: &str) -> Result<Inbound, ProtocolError> {
    if text == PING {
        return Ok(Inbound::Ping);
    }
    let value: Value = serde_json::from_str(text)
        .map_err(|e| ProtocolError::InvalidControlMessage(e.to_string()))?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::InvalidControlMessage("missing \"type\" field".into()))?;
    if !KNOWN_TYPES.contains(&kind) {
        return Err(ProtocolError::UnknownType(kind.to_owned()));
    }
    serde_json::from_value(value)
        .map(Inbound::Control)
        .map_err(|e| ProtocolError::InvalidControlMessage(e.to_string()))
}

/// Apply a control message to `conn` and build the reply.
pub fn apply_control(conn: &dyn Connection, message: ClientMessage) -> ServerMessage {
    match message {
        ClientMessage::Subscribe { topic } => {
            let result = conn.subscribe(&topic);
            ServerMessage::SubscribeAck {
                topic,
                success: result.is_ok(),
                error: result.err().map(|e| e.to_string()),
            }
        }
        ClientMessage::Unsubscribe { topic } => {
            let result = conn.unsubscribe(&topic);
            ServerMessage::UnsubscribeAck {
                topic,
                success: result.is_ok(),
                error: result.err().map(|e| e.to_string()),
            }
        }
        ClientMessage::GetTopics => ServerMessage::Topics {
            topics: conn.topics(),
        },
        ClientMessage::Heartbeat { .. } => ServerMessage::HeartbeatAck {
            timestamp: Utc::now().timestamp(),
        },
    }
}
