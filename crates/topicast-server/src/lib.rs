//! # topicast-server
//!
//! Axum HTTP + `WebSocket` server with topic-based fan-out.
//!
//! - Connection registry keyed by client id, surviving reconnects
//! - Per-connection topic subscriptions driven by a small JSON protocol
//! - Broadcast to all clients or to one topic, best-effort per recipient
//! - Supervised heartbeat and stale-connection reaper loops
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use server::TopicastServer;
