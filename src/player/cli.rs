// ABOUTME: Command-line arguments for the player binary
// ABOUTME: Maps flags onto PlayerConfig and picks the audio sink

use crate::audio::output::{ClockedOutputFactory, OutputFactory};
use crate::player::config::{PlayerConfig, DEFAULT_PATH, DEFAULT_PLAYER_PORT, DEFAULT_SERVER_PORT};
use crate::Result;
use clap::Args;
use std::net::SocketAddr;
use std::sync::Arc;

/// Player arguments
///
/// Flatten into a binary's `Parser` with `#[command(flatten)]`.
#[derive(Args, Debug, Clone)]
pub struct PlayerArgs {
    /// Player name shown to senders
    #[arg(short, long, default_value = "Sendspin Player")]
    pub name: String,

    /// Stable client id (random when omitted)
    #[arg(long)]
    pub client_id: Option<String>,

    /// Address to listen on for senders
    #[arg(short, long, default_value_t = SocketAddr::from(([0, 0, 0, 0], DEFAULT_PLAYER_PORT)))]
    pub listen: SocketAddr,

    /// WebSocket endpoint path
    #[arg(long, default_value = DEFAULT_PATH)]
    pub path: String,

    /// Connect to this sender instead of listening
    #[arg(short, long)]
    pub server: Option<String>,

    /// Sender port used with --server
    #[arg(long, default_value_t = DEFAULT_SERVER_PORT)]
    pub server_port: u16,

    /// Write raw PCM to this file ("-" for stdout); audio is discarded otherwise
    #[arg(short, long)]
    pub output: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl PlayerArgs {
    /// Initialize tracing based on verbosity flag
    pub fn init_tracing(&self) {
        crate::logging::init_tracing(self.verbose);
    }

    /// Log startup information
    pub fn log_startup_info(&self) {
        tracing::info!("Sendspin Player v{}", env!("CARGO_PKG_VERSION"));
        match &self.server {
            Some(host) => {
                tracing::info!("Server: ws://{}:{}{}", host, self.server_port, self.path)
            }
            None => tracing::info!("Listening: ws://{}{}", self.listen, self.path),
        }
        match self.output.as_deref() {
            Some("-") => tracing::info!("Output: stdout"),
            Some(path) => tracing::info!("Output: {}", path),
            None => tracing::info!("Output: discarded"),
        }
    }

    /// Build PlayerConfig from these args
    pub fn build_config(&self) -> PlayerConfig {
        let mut config = PlayerConfig::new(&self.name)
            .listen_addr(self.listen)
            .path(self.path.clone());
        if let Some(id) = &self.client_id {
            config = config.client_id(id.clone());
        }
        if let Some(host) = &self.server {
            config = config.server(host.clone(), self.server_port);
        }
        config
    }

    /// Create the output selected by `--output`
    pub fn create_output(&self) -> Result<Arc<dyn OutputFactory>> {
        let factory = match self.output.as_deref() {
            None => ClockedOutputFactory::discard(),
            Some("-") => ClockedOutputFactory::new(Box::new(std::io::stdout())),
            Some(path) => ClockedOutputFactory::new(Box::new(std::fs::File::create(path)?)),
        };
        Ok(Arc::new(factory))
    }
}
