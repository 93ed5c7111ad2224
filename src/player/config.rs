// ABOUTME: Player configuration
// ABOUTME: Identity, transport endpoints, offered formats and playout sizing

use crate::audio::playout::DEFAULT_BUFFER_SIZE;
use crate::audio::types::AudioFormat;
use crate::ws::WebSocketConfig;
use std::net::{Ipv4Addr, SocketAddr};

/// Port players listen on
pub const DEFAULT_PLAYER_PORT: u16 = 8928;
/// Port senders listen on
pub const DEFAULT_SERVER_PORT: u16 = 8927;
/// Upgrade path used by both sides
pub const DEFAULT_PATH: &str = "/sendspin";

/// Player configuration
#[derive(Clone, Debug)]
pub struct PlayerConfig {
    /// Stable client identifier
    pub client_id: String,
    /// Human-readable player name
    pub name: String,
    /// Product name in device_info
    pub product_name: String,
    /// Address to listen on when no server is configured
    pub listen_addr: SocketAddr,
    /// WebSocket path, used for listening and connecting
    pub path: String,
    /// Sender host to connect to instead of listening
    pub server: Option<String>,
    /// Sender port
    pub server_port: u16,
    /// Formats offered in client/hello, in order of preference
    pub supported_formats: Vec<AudioFormat>,
    /// Buffer capacity advertised to senders, in bytes
    pub buffer_capacity: u32,
    /// Commands advertised to senders
    pub supported_commands: Vec<String>,
    /// Jitter buffer size in bytes
    pub buffer_size: usize,
    /// Keep only one sender session at a time
    pub single_server: bool,
    /// Transport settings
    pub websocket: WebSocketConfig,
}

impl PlayerConfig {
    /// Create a configuration with the given player name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the client id
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = id.into();
        self
    }

    /// Set the listen address
    pub fn listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = addr;
        self
    }

    /// Set the WebSocket path
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Connect to this sender instead of listening
    pub fn server(mut self, host: impl Into<String>, port: u16) -> Self {
        self.server = Some(host.into());
        self.server_port = port;
        self
    }

    /// Set the offered formats
    pub fn supported_formats(mut self, formats: Vec<AudioFormat>) -> Self {
        self.supported_formats = formats;
        self
    }

    /// Set the jitter buffer size
    pub fn buffer_size(mut self, bytes: usize) -> Self {
        self.buffer_size = bytes;
        self
    }

    /// Enable or disable the single-server policy
    pub fn single_server(mut self, enabled: bool) -> Self {
        self.single_server = enabled;
        self
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            client_id: format!("sendspin-{}", uuid::Uuid::new_v4()),
            name: "Sendspin Player".to_string(),
            product_name: "Sendspin-RS Player".to_string(),
            listen_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PLAYER_PORT)),
            path: DEFAULT_PATH.to_string(),
            server: None,
            server_port: DEFAULT_SERVER_PORT,
            supported_formats: vec![
                AudioFormat::pcm(48000, 2, 16),
                AudioFormat::pcm(48000, 1, 16),
            ],
            buffer_capacity: 32_000_000,
            supported_commands: vec!["volume".to_string(), "mute".to_string()],
            buffer_size: DEFAULT_BUFFER_SIZE,
            single_server: true,
            websocket: WebSocketConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PlayerConfig::new("Kitchen");
        assert_eq!(config.name, "Kitchen");
        assert_eq!(config.listen_addr.port(), 8928);
        assert_eq!(config.server_port, 8927);
        assert_eq!(config.path, "/sendspin");
        assert!(config.client_id.starts_with("sendspin-"));
        assert_eq!(config.supported_formats.len(), 2);
        assert!(config.single_server);
    }

    #[test]
    fn test_server_mode() {
        let config = PlayerConfig::new("x").server("10.0.0.2", 9000);
        assert_eq!(config.server.as_deref(), Some("10.0.0.2"));
        assert_eq!(config.server_port, 9000);
    }
}
