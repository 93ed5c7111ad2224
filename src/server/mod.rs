// ABOUTME: Sending side of the Sendspin protocol
// ABOUTME: Client sessions, audio engine, sources, encoders and configuration

mod audio_engine;
mod audio_source;
/// Command-line arguments
pub mod cli;
mod client;
mod client_manager;
mod config;
mod encoder;
#[allow(clippy::module_inception)]
mod server;

pub use audio_engine::{spawn_audio_engine, AudioEngine};
pub use audio_source::{AudioSource, SilenceSource, SourceFactory, TestToneSource, ToneFactory};
pub use cli::ServerArgs;
pub use client::{ClientInfo, ClientSession};
pub use client_manager::ClientManager;
pub use config::ServerConfig;
pub use encoder::{create_encoder, AudioEncoder, PcmEncoder};
pub use server::SendspinServer;
