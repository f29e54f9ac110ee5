//! WebSocket gateway: connection handles, topic fan-out, heartbeat and
//! reaper loops, and the per-socket session.

pub mod connection;
pub mod errors;
pub mod handler;
pub mod heartbeat;
pub mod identity;
pub mod manager;
pub mod protocol;
pub mod reaper;
pub mod session;
pub mod supervisor;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;
