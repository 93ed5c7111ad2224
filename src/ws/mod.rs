// ABOUTME: Minimal WebSocket transport over tokio TCP sockets
// ABOUTME: Upgrade handshake, frame codec, queued output and connection events

/// Connection handle, events and the per-socket driver
pub mod connection;
/// Listening servers, outgoing connects and engine events
pub mod engine;
/// Frame encoding and incremental decoding
pub mod frame;
/// HTTP upgrade handshake
pub mod handshake;

pub use connection::{Connection, ConnectionEvents, Role};
pub use engine::{WebSocket, WebSocketConfig, WebSocketEvents, MAX_CONNECTIONS};
pub use frame::{encode_frame, Frame, FrameDecoder, Opcode};
pub use handshake::accept_key;
