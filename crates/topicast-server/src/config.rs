//! Server configuration.

use topicast_settings::TopicastSettings;

use crate::websocket::connection::ConnectionOptions;
use crate::websocket::manager::ManagerConfig;

/// Configuration for the topicast server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` auto-assigns).
    pub port: u16,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Cookie carrying the client id between reconnects.
    pub cookie_name: String,
    /// Outbound frames buffered per connection.
    pub send_queue_capacity: usize,
    /// Per-handle tuning.
    pub connection: ConnectionOptions,
    /// Heartbeat / reaper timers.
    pub manager: ManagerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&TopicastSettings::default())
    }
}

impl From<&TopicastSettings> for ServerConfig {
    fn from(settings: &TopicastSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_message_size: settings.server.max_message_size,
            cookie_name: settings.server.cookie_name.clone(),
            send_queue_capacity: settings.connections.send_queue_capacity,
            connection: ConnectionOptions::from(&settings.connections),
            manager: ManagerConfig::from(&settings.connections),
        }
    }
}

impl ServerConfig {
    /// `host:port` string suitable for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
