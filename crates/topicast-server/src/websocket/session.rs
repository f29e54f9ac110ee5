//! WebSocket session lifecycle: handles a single connected client from
//! upgrade through disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::StreamExt;
use metrics::{counter, gauge};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::{ClientConnection, Connection, ConnectionOptions};
use super::handler::handle_message;
use super::manager::ConnectionManager;
use super::protocol::ServerMessage;
use super::transport::{run_writer, Transport, WsTransport};
use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL};

/// How long the writer gets to flush a Close frame after the read side ends.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Bind `transport` to the handle for `client_id`.
///
/// An existing handle keeps its subscriptions and has its transport swapped;
/// otherwise a new handle is registered. Returns `None` and closes
/// `transport` once the manager has shut down.
pub async fn attach(
    manager: &ConnectionManager,
    client_id: &str,
    transport: Box<dyn Transport>,
    options: &ConnectionOptions,
) -> Option<Arc<dyn Connection>> {
    if manager.is_shut_down() {
        debug!(client_id, "rejecting connection after shutdown");
        if let Err(e) = transport.close().await {
            debug!(client_id, error = %e, "failed to close rejected transport");
        }
        return None;
    }
    if let Some(existing) = manager.get_client(client_id).await {
        info!(client_id, topics = existing.topics().len(), "client reconnected");
        existing.update_connection(transport).await;
        return Some(existing);
    }
    let conn: Arc<dyn Connection> =
        Arc::new(ClientConnection::new(client_id, transport, options.clone()));
    manager.add_client(client_id, Arc::clone(&conn)).await;
    info!(client_id, "client connected");
    Some(conn)
}

/// Tear down the session that installed `transport_id` on `conn`.
///
/// When that transport is still current it is closed and `conn` is removed
/// from the registry. Returns `false` when a newer session owns the handle.
pub async fn detach(
    manager: &ConnectionManager,
    client_id: &str,
    conn: &Arc<dyn Connection>,
    transport_id: &str,
) -> bool {
    let owned = match conn.release(transport_id).await {
        Ok(owned) => owned,
        Err(e) => {
            warn!(client_id, error = %e, "failed to close transport");
            true
        }
    };
    if !owned {
        debug!(client_id, "session ended after transport was replaced");
        return false;
    }
    if manager.remove_if_current(client_id, conn).await {
        info!(client_id, "client disconnected");
    }
    true
}

/// Run a WebSocket session for a connected client.
///
/// 1. Attaches a fresh transport to the client's handle
/// 2. Sends the `connected` greeting
/// 3. Dispatches inbound text frames until the socket closes or `cancel` fires
/// 4. Closes the transport and unregisters the client, unless a newer
///    session has taken the handle over
#[instrument(skip_all, fields(client_id = %client_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    client_id: String,
    manager: Arc<ConnectionManager>,
    options: ConnectionOptions,
    queue_capacity: usize,
    cancel: CancellationToken,
) {
    let (ws_tx, mut ws_rx) = ws.split();
    let (transport, rx) = WsTransport::channel(queue_capacity);
    let transport_id = transport.id().to_owned();
    let mut writer = tokio::spawn(run_writer(ws_tx, rx));

    let Some(conn) = attach(&manager, &client_id, Box::new(transport), &options).await else {
        let _ = tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await;
        writer.abort();
        return;
    };
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    match ServerMessage::connected(client_id.as_str()).to_bytes() {
        Ok(greeting) => {
            if let Err(e) = conn.send(greeting).await {
                warn!(error = %e, "failed to send connected greeting");
            }
        }
        Err(e) => warn!(error = %e, "failed to serialize connected greeting"),
    }

    loop {
        let frame = tokio::select! {
            frame = ws_rx.next() => frame,
            () = cancel.cancelled() => break,
        };
        let msg = match frame {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                debug!(error = %e, "websocket read failed");
                break;
            }
            None => break,
        };

        match msg {
            Message::Text(text) => handle_message(&*conn, text.as_str()).await,
            Message::Binary(data) => match std::str::from_utf8(&data) {
                Ok(text) => handle_message(&*conn, text).await,
                Err(_) => debug!(len = data.len(), "ignoring non-UTF8 binary frame"),
            },
            Message::Close(_) => {
                debug!("client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    let _ = detach(&manager, &client_id, &conn, &transport_id).await;
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);

    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        writer.abort();
    }
}
