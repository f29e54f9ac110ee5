//! Inbound frame dispatch: parses a text frame, applies it to the
//! connection and sends the reply through the same connection.

use bytes::Bytes;
use tracing::{debug, error, warn};

use super::connection::Connection;
use super::protocol::{apply_control, parse_inbound, Inbound, PONG};

/// Handle one inbound text frame for `conn`.
///
/// Invalid or unknown control frames are ignored without a reply.
pub async fn handle_message(conn: &dyn Connection, text: &str) {
    let reply = match parse_inbound(text) {
        Ok(Inbound::Ping) => Bytes::from_static(PONG.as_bytes()),
        Ok(Inbound::Control(message)) => {
            let response = apply_control(conn, message);
            match response.to_bytes() {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!(client_id = %conn.client_id(), error = %e, "failed to serialize reply");
                    return;
                }
            }
        }
        Err(e) => {
            debug!(client_id = %conn.client_id(), error = %e, "ignoring invalid control message");
            return;
        }
    };

    if let Err(e) = conn.send(reply).await {
        warn!(client_id = %conn.client_id(), error = %e, "failed to send reply");
    }
}
