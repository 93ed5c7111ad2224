// ABOUTME: Audio types and processing for sendspin-rs
// ABOUTME: Formats, ring buffer, drift-corrected playout and local output

/// Local playback stream abstraction
pub mod output;
/// Jitter-buffered, clock-corrected playout
pub mod playout;
/// Byte ring buffer
pub mod ring;
/// Core audio type definitions (Sample, Codec, AudioFormat)
pub mod types;

pub use output::{ClockedOutputFactory, OutputFactory, OutputStream};
pub use playout::{Playout, Pull, PullTiming, SharedPlayout};
pub use ring::RingBuffer;
pub use types::{AudioFormat, Codec, Sample};
