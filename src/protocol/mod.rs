// ABOUTME: Sendspin protocol layer
// ABOUTME: Message payloads, explicit builders and the binary audio chunk format

/// Per-message JSON builders
pub mod builder;
/// Binary audio chunk codec
pub mod chunk;
/// Message payload types and parser
pub mod messages;

pub use chunk::{AudioChunk, AUDIO_CHUNK_TYPE};
pub use messages::{Message, Roles, PROTOCOL_VERSION};
