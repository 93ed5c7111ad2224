// ABOUTME: Receiving side of the Sendspin protocol
// ABOUTME: Player, per-sender sessions, configuration and CLI arguments

/// Command-line arguments
pub mod cli;
/// Player configuration
pub mod config;
#[allow(clippy::module_inception)]
mod player;
/// Per-connection session
pub mod session;

pub use cli::PlayerArgs;
pub use config::{PlayerConfig, DEFAULT_PATH, DEFAULT_PLAYER_PORT, DEFAULT_SERVER_PORT};
pub use player::Player;
pub use session::{time_sync_interval, Session, SessionInfo};
