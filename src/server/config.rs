// ABOUTME: Sender configuration
// ABOUTME: Identity, endpoints, group and streaming parameters

use crate::player::config::{DEFAULT_PATH, DEFAULT_PLAYER_PORT, DEFAULT_SERVER_PORT};
use crate::protocol::messages::ConnectionReason;
use crate::ws::WebSocketConfig;
use std::net::{Ipv4Addr, SocketAddr};

/// Sender configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Address to listen on when no receivers are configured
    pub bind_addr: SocketAddr,
    /// WebSocket endpoint path
    pub ws_path: String,
    /// Server name sent in server/hello
    pub name: String,
    /// Unique server identifier
    pub server_id: String,
    /// Group all clients are placed in
    pub group_id: String,
    /// Group name sent in group/update
    pub group_name: String,
    /// Why we are connecting, sent in server/hello
    pub connection_reason: ConnectionReason,
    /// Players to connect to instead of listening
    pub receivers: Vec<String>,
    /// Port players listen on
    pub receiver_port: u16,
    /// How far ahead of now audio is stamped, in seconds
    pub delay_secs: f64,
    /// Audio chunk interval in milliseconds
    pub chunk_interval_ms: u64,
    /// Test tone frequency, 0 for silence
    pub frequency: f64,
    /// Transport settings
    pub websocket: WebSocketConfig,
}

impl ServerConfig {
    /// Create a new server configuration with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the WebSocket path
    pub fn ws_path(mut self, path: impl Into<String>) -> Self {
        self.ws_path = path.into();
        self
    }

    /// Connect to these players instead of listening
    pub fn receivers(mut self, hosts: Vec<String>, port: u16) -> Self {
        self.receivers = hosts;
        self.receiver_port = port;
        self
    }

    /// Set the connection reason
    pub fn connection_reason(mut self, reason: ConnectionReason) -> Self {
        self.connection_reason = reason;
        self
    }

    /// Set the playback delay in seconds
    pub fn delay_secs(mut self, secs: f64) -> Self {
        self.delay_secs = secs.max(0.0);
        self
    }

    /// Set the chunk interval in milliseconds
    pub fn chunk_interval_ms(mut self, ms: u64) -> Self {
        self.chunk_interval_ms = ms.max(1);
        self
    }

    /// Set the test tone frequency
    pub fn frequency(mut self, hz: f64) -> Self {
        self.frequency = hz;
        self
    }

    /// Playback delay in microseconds
    pub fn delay_us(&self) -> u64 {
        (self.delay_secs * 1e6) as u64
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_SERVER_PORT)),
            ws_path: DEFAULT_PATH.to_string(),
            name: "Sendspin Server".to_string(),
            server_id: uuid::Uuid::new_v4().to_string(),
            group_id: uuid::Uuid::new_v4().to_string(),
            group_name: "Sendspin".to_string(),
            connection_reason: ConnectionReason::Discovery,
            receivers: Vec::new(),
            receiver_port: DEFAULT_PLAYER_PORT,
            delay_secs: 5.0,
            chunk_interval_ms: 20,
            frequency: 440.0,
            websocket: WebSocketConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 8927);
        assert_eq!(config.ws_path, "/sendspin");
        assert_eq!(config.receiver_port, 8928);
        assert_eq!(config.delay_us(), 5_000_000);
        assert_eq!(config.connection_reason, ConnectionReason::Discovery);
        assert_ne!(config.server_id, config.group_id);
    }

    #[test]
    fn test_builders() {
        let config = ServerConfig::new("Living Room")
            .receivers(vec!["10.0.0.3".into()], 9000)
            .delay_secs(0.25)
            .chunk_interval_ms(0);
        assert_eq!(config.name, "Living Room");
        assert_eq!(config.receivers, vec!["10.0.0.3".to_string()]);
        assert_eq!(config.receiver_port, 9000);
        assert_eq!(config.delay_us(), 250_000);
        assert_eq!(config.chunk_interval_ms, 1);
    }
}
