// ABOUTME: Main library entry point for sendspin-rs
// ABOUTME: Exports the WebSocket transport, protocol, clock sync and both peer roles

//! # sendspin-rs
//!
//! Clock-synchronized network audio for multi-room playback.
//!
//! A sender streams timestamped audio over a small self-contained WebSocket
//! transport to any number of players. Players estimate the sender's clock
//! from periodic timestamp exchanges and pull audio out of a jitter buffer
//! at a continuously corrected rate, so every room plays the same sample at
//! the same moment.
//!
//! ## Features
//!
//! - **ws**: RFC 6455 framing and HTTP upgrade on non-blocking tokio sockets
//! - **protocol**: Sendspin JSON control messages and binary audio chunks
//! - **sync**: Windowed regression and delay-locked loop for clock tracking
//! - **audio**: Ring buffer and drift-corrected playout
//! - **server**: The sending side
//! - **player**: The receiving side
//!
//! ## Example: Running a Player
//!
//! ```no_run
//! use sendspin::player::{Player, PlayerConfig};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let config = PlayerConfig::new("Kitchen");
//!     let player = Player::new(config);
//!     player.start().await.unwrap();
//!     tokio::signal::ctrl_c().await.unwrap();
//! }
//! ```

#![warn(missing_docs)]

/// Audio formats, ring buffer, playout and output
pub mod audio;
/// Logging setup shared by the binaries
pub mod logging;
/// Receiving side of the protocol
pub mod player;
/// Sendspin message types, builders and parsers
pub mod protocol;
/// Sending side of the protocol
pub mod server;
/// Clock synchronization utilities
pub mod sync;
/// WebSocket transport
pub mod ws;

pub use player::{Player, PlayerConfig};
pub use protocol::messages::{ClientHello, ServerHello};
pub use server::{SendspinServer, ServerConfig};
pub use ws::{Connection, WebSocket, WebSocketConfig};

/// Result type for sendspin operations
pub type Result<T> = std::result::Result<T, error::Error>;

/// Error types for sendspin
pub mod error {
    use thiserror::Error;

    /// Error types for sendspin operations
    #[derive(Error, Debug)]
    pub enum Error {
        /// Socket-level failure
        #[error("I/O error: {0}")]
        Io(#[from] std::io::Error),

        /// Protocol violation or parsing error
        #[error("Protocol error: {0}")]
        Protocol(String),

        /// Message with a missing field or a field of the wrong type
        #[error("Invalid message: {0}")]
        InvalidMessage(String),

        /// Version, codec or format we do not handle
        #[error("Not supported: {0}")]
        NotSupported(String),

        /// Connection-related error
        #[error("Connection error: {0}")]
        Connection(String),

        /// Audio output error
        #[error("Audio output error: {0}")]
        Output(String),
    }

    impl Error {
        /// Whether a peer that caused this error should be sent away
        ///
        /// Malformed or unsupported application messages end the session;
        /// everything else is only logged.
        pub fn ends_session(&self) -> bool {
            matches!(self, Error::InvalidMessage(_) | Error::NotSupported(_))
        }
    }

    impl From<serde_json::Error> for Error {
        fn from(err: serde_json::Error) -> Self {
            Error::InvalidMessage(err.to_string())
        }
    }
}
