// ABOUTME: Binary audio chunk framing
// ABOUTME: [type:u8 = 4][timestamp_us:u64 BE][payload]

use crate::error::Error;
use crate::Result;

/// Binary message type for player audio chunks
pub const AUDIO_CHUNK_TYPE: u8 = 0x04;

/// Bytes before the payload
pub const AUDIO_CHUNK_HEADER_LEN: usize = 9;

/// One timestamped block of audio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioChunk<'a> {
    /// Sender clock time at which the first frame should play (microseconds)
    pub timestamp_us: u64,
    /// Encoded audio
    pub data: &'a [u8],
}

impl<'a> AudioChunk<'a> {
    /// Header for a chunk playing at `timestamp_us`
    ///
    /// Sent together with the payload as two buffers of one frame.
    pub fn header(timestamp_us: u64) -> [u8; AUDIO_CHUNK_HEADER_LEN] {
        let mut header = [0u8; AUDIO_CHUNK_HEADER_LEN];
        header[0] = AUDIO_CHUNK_TYPE;
        header[1..].copy_from_slice(&timestamp_us.to_be_bytes());
        header
    }

    /// Serialize into a single buffer
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(AUDIO_CHUNK_HEADER_LEN + self.data.len());
        out.extend_from_slice(&Self::header(self.timestamp_us));
        out.extend_from_slice(self.data);
        out
    }

    /// Parse a binary message
    ///
    /// Returns `None` for binary messages of another type, which receivers
    /// ignore.
    pub fn parse(bytes: &'a [u8]) -> Result<Option<Self>> {
        if bytes.len() < AUDIO_CHUNK_HEADER_LEN {
            return Err(Error::Protocol(format!(
                "binary message of {} bytes is shorter than its header",
                bytes.len()
            )));
        }
        if bytes[0] != AUDIO_CHUNK_TYPE {
            return Ok(None);
        }
        let mut ts = [0u8; 8];
        ts.copy_from_slice(&bytes[1..AUDIO_CHUNK_HEADER_LEN]);
        Ok(Some(AudioChunk {
            timestamp_us: u64::from_be_bytes(ts),
            data: &bytes[AUDIO_CHUNK_HEADER_LEN..],
        }))
    }
}
