//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and implement
//! [`Default`] with production values. `#[serde(default)]` on every section
//! allows partial JSON: missing fields keep their default.

mod connections;
mod server;

pub use connections::*;
pub use server::*;

use serde::{Deserialize, Serialize};

/// Root settings type.
///
/// Loaded from `~/.topicast/settings.json` with defaults applied for missing
/// fields. Environment variables can override specific values.
///
/// ```json
/// {
///   "server": { "port": 9090 },
///   "connections": { "staleThresholdMs": 120000 }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TopicastSettings {
    /// HTTP / WebSocket listener settings.
    pub server: ServerSettings,
    /// Connection manager timers and limits.
    pub connections: ConnectionSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

impl TopicastSettings {
    /// Reject values the connection manager cannot run with.
    pub fn validate(&self) -> crate::Result<()> {
        let c = &self.connections;
        for (name, value) in [
            ("heartbeatIntervalMs", c.heartbeat_interval_ms),
            ("reapIntervalMs", c.reap_interval_ms),
            ("staleThresholdMs", c.stale_threshold_ms),
            ("sendTimeoutMs", c.send_timeout_ms),
        ] {
            if value == 0 {
                return Err(crate::SettingsError::ZeroValue { field: name });
            }
        }
        if c.send_queue_capacity == 0 {
            return Err(crate::SettingsError::ZeroValue {
                field: "sendQueueCapacity",
            });
        }
        Ok(())
    }
}
