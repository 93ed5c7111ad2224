// ABOUTME: Command-line arguments for the sender binary
// ABOUTME: Maps flags onto ServerConfig and logs the startup summary

use crate::player::config::{DEFAULT_PATH, DEFAULT_PLAYER_PORT, DEFAULT_SERVER_PORT};
use crate::protocol::messages::ConnectionReason;
use crate::server::ServerConfig;
use clap::{Args, ValueEnum};
use std::net::SocketAddr;

/// Connection reason as a command-line value
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasonArg {
    /// Announce only
    Discovery,
    /// Take over the player
    Playback,
}

impl From<ReasonArg> for ConnectionReason {
    fn from(reason: ReasonArg) -> Self {
        match reason {
            ReasonArg::Discovery => ConnectionReason::Discovery,
            ReasonArg::Playback => ConnectionReason::Playback,
        }
    }
}

/// Server arguments
///
/// Use with `#[command(flatten)]` in your binary's Args struct:
/// ```ignore
/// #[derive(Parser)]
/// struct MyArgs {
///     #[command(flatten)]
///     server: ServerArgs,
/// }
/// ```
#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Address to bind the server to
    #[arg(short, long, default_value_t = SocketAddr::from(([127, 0, 0, 1], DEFAULT_SERVER_PORT)))]
    pub bind: SocketAddr,

    /// Server name
    #[arg(short, long, default_value = "Sendspin Server")]
    pub name: String,

    /// WebSocket endpoint path
    #[arg(long, default_value = DEFAULT_PATH)]
    pub path: String,

    /// Connect to this player instead of listening (repeatable)
    #[arg(short, long = "receiver")]
    pub receivers: Vec<String>,

    /// Port players listen on
    #[arg(long, default_value_t = DEFAULT_PLAYER_PORT)]
    pub receiver_port: u16,

    /// Reason sent in server/hello
    #[arg(long, value_enum, default_value = "discovery")]
    pub reason: ReasonArg,

    /// Test tone frequency in Hz (0 for silence)
    #[arg(short, long, default_value = "440.0")]
    pub frequency: f64,

    /// Audio chunk interval in milliseconds
    #[arg(long, default_value = "20")]
    pub chunk_ms: u64,

    /// How far ahead audio is timestamped, in seconds
    #[arg(long, default_value = "5.0")]
    pub delay: f64,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl ServerArgs {
    /// Initialize tracing based on verbosity flag
    pub fn init_tracing(&self) {
        crate::logging::init_tracing(self.verbose);
    }

    /// Log startup information
    pub fn log_startup_info(&self) {
        tracing::info!("Sendspin Server v{}", env!("CARGO_PKG_VERSION"));
        if self.receivers.is_empty() {
            tracing::info!("Endpoint: ws://{}{}", self.bind, self.path);
        } else {
            for host in &self.receivers {
                tracing::info!("Player: ws://{}:{}{}", host, self.receiver_port, self.path);
            }
        }
        if self.frequency > 0.0 {
            tracing::info!("Audio: {} Hz test tone, {} s delay", self.frequency, self.delay);
        } else {
            tracing::info!("Audio: silence, {} s delay", self.delay);
        }
    }

    /// Build ServerConfig from these args
    pub fn build_config(&self) -> ServerConfig {
        ServerConfig::new(&self.name)
            .bind_addr(self.bind)
            .ws_path(self.path.clone())
            .receivers(self.receivers.clone(), self.receiver_port)
            .connection_reason(self.reason.into())
            .frequency(self.frequency)
            .chunk_interval_ms(self.chunk_ms)
            .delay_secs(self.delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        server: ServerArgs,
    }

    #[test]
    fn test_default_args() {
        let cli = TestCli::parse_from(["sendspin-server"]);
        assert_eq!(cli.server.bind.port(), 8927);
        assert_eq!(cli.server.chunk_ms, 20);
        assert_eq!(cli.server.delay, 5.0);
        assert_eq!(cli.server.reason, ReasonArg::Discovery);
        assert!(cli.server.receivers.is_empty());
    }

    #[test]
    fn test_build_config() {
        let cli = TestCli::parse_from([
            "sendspin-server",
            "--bind",
            "127.0.0.1:9000",
            "--receiver",
            "10.0.0.7",
            "--receiver",
            "10.0.0.8",
            "--reason",
            "playback",
            "--chunk-ms",
            "10",
        ]);
        let config = cli.server.build_config();
        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.receivers.len(), 2);
        assert_eq!(config.receiver_port, 8928);
        assert_eq!(config.connection_reason, ConnectionReason::Playback);
        assert_eq!(config.chunk_interval_ms, 10);
    }
}
