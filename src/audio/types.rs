// ABOUTME: Core audio type definitions
// ABOUTME: Sample, Codec and AudioFormat with wire-format validation

use crate::error::Error;
use crate::protocol::messages::{AudioFormatSpec, StreamPlayerConfig};
use crate::Result;

/// Most channels accepted in a format
pub const MAX_CHANNELS: u32 = 64;

/// One 24-bit sample stored in an i32
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Sample(pub i32);

impl Sample {
    /// Silence
    pub const ZERO: Sample = Sample(0);
    /// Largest 24-bit value
    pub const MAX: Sample = Sample(0x7F_FFFF);
    /// Smallest 24-bit value
    pub const MIN: Sample = Sample(-0x80_0000);

    /// Widen a 16-bit sample
    #[inline]
    pub fn from_i16(value: i16) -> Self {
        Sample((value as i32) << 8)
    }

    /// Narrow to 16 bits
    #[inline]
    pub fn to_i16(self) -> i16 {
        (self.0.clamp(Self::MIN.0, Self::MAX.0) >> 8) as i16
    }

    /// Little-endian 24-bit bytes
    #[inline]
    pub fn to_i24_le(self) -> [u8; 3] {
        let v = self.0.clamp(Self::MIN.0, Self::MAX.0);
        [v as u8, (v >> 8) as u8, (v >> 16) as u8]
    }
}

/// Audio codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    /// Raw little-endian PCM
    Pcm,
    /// Opus
    Opus,
    /// FLAC
    Flac,
}

impl Codec {
    /// Look up a codec by its wire name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "pcm" => Some(Codec::Pcm),
            "opus" => Some(Codec::Opus),
            "flac" => Some(Codec::Flac),
            _ => None,
        }
    }

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Codec::Pcm => "pcm",
            Codec::Opus => "opus",
            Codec::Flac => "flac",
        }
    }
}

/// A negotiated stream format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Codec
    pub codec: Codec,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of interleaved channels
    pub channels: u32,
    /// Bits per sample (16 or 24 for PCM)
    pub bit_depth: u32,
}

impl AudioFormat {
    /// A PCM format
    pub fn pcm(sample_rate: u32, channels: u32, bit_depth: u32) -> Self {
        Self {
            codec: Codec::Pcm,
            sample_rate,
            channels,
            bit_depth,
        }
    }

    /// Validate wire fields into a format
    ///
    /// Unknown codecs and PCM depths other than 16/24 are
    /// [`Error::NotSupported`]; zero rates or channel counts are
    /// [`Error::InvalidMessage`].
    pub fn parse(
        codec: &str,
        sample_rate: u32,
        channels: u32,
        bit_depth: Option<u32>,
    ) -> Result<Self> {
        let codec = Codec::from_name(codec)
            .ok_or_else(|| Error::NotSupported(format!("codec '{}'", codec)))?;
        if sample_rate == 0 {
            return Err(Error::InvalidMessage("sample_rate must be positive".into()));
        }
        if channels == 0 || channels > MAX_CHANNELS {
            return Err(Error::InvalidMessage(format!(
                "invalid channel count {}",
                channels
            )));
        }
        let bit_depth = match (codec, bit_depth) {
            (Codec::Pcm, Some(depth @ (16 | 24))) => depth,
            (Codec::Pcm, Some(depth)) => {
                return Err(Error::NotSupported(format!("PCM bit depth {}", depth)))
            }
            (Codec::Pcm, None) => {
                return Err(Error::InvalidMessage("PCM format without bit_depth".into()))
            }
            (_, depth) => depth.unwrap_or(16),
        };
        Ok(Self {
            codec,
            sample_rate,
            channels,
            bit_depth,
        })
    }

    /// Format announced in stream/start
    pub fn from_stream_config(config: &StreamPlayerConfig) -> Result<Self> {
        Self::parse(
            &config.codec,
            config.sample_rate,
            config.channels,
            config.bit_depth,
        )
    }

    /// Format offered in a client's supported_formats
    pub fn from_spec(spec: &AudioFormatSpec) -> Result<Self> {
        Self::parse(&spec.codec, spec.sample_rate, spec.channels, Some(spec.bit_depth))
    }

    /// As a supported_formats entry
    pub fn to_spec(&self) -> AudioFormatSpec {
        AudioFormatSpec {
            codec: self.codec.as_str().to_string(),
            channels: self.channels,
            sample_rate: self.sample_rate,
            bit_depth: self.bit_depth,
        }
    }

    /// As the player part of stream/start
    pub fn to_stream_config(&self) -> StreamPlayerConfig {
        StreamPlayerConfig {
            codec: self.codec.as_str().to_string(),
            sample_rate: self.sample_rate,
            channels: self.channels,
            bit_depth: (self.codec == Codec::Pcm).then_some(self.bit_depth),
            codec_header: None,
        }
    }

    /// Bytes per interleaved frame
    ///
    /// Compressed streams are handled as opaque bytes and use a stride of 1.
    pub fn stride(&self) -> usize {
        match self.codec {
            Codec::Pcm => (self.bit_depth as usize / 8) * self.channels as usize,
            Codec::Opus | Codec::Flac => 1,
        }
    }
}
