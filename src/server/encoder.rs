// ABOUTME: Audio encoders for outgoing streams
// ABOUTME: Little-endian PCM at 16 or 24 bits

use crate::audio::types::{AudioFormat, Codec, Sample};
use crate::error::Error;
use crate::Result;

/// Turns samples into wire bytes for one stream
pub trait AudioEncoder: Send {
    /// Encode interleaved samples
    fn encode(&mut self, samples: &[Sample]) -> Vec<u8>;

    /// Format of the encoded stream
    fn format(&self) -> AudioFormat;
}

/// Little-endian PCM encoder
pub struct PcmEncoder {
    format: AudioFormat,
}

impl PcmEncoder {
    /// Encoder for a PCM format of depth 16 or 24
    pub fn new(format: AudioFormat) -> Result<Self> {
        match (format.codec, format.bit_depth) {
            (Codec::Pcm, 16 | 24) => Ok(Self { format }),
            (Codec::Pcm, depth) => Err(Error::NotSupported(format!("PCM bit depth {}", depth))),
            (codec, _) => Err(Error::NotSupported(format!(
                "encoding {}",
                codec.as_str()
            ))),
        }
    }
}

impl AudioEncoder for PcmEncoder {
    fn encode(&mut self, samples: &[Sample]) -> Vec<u8> {
        let bytes = self.format.bit_depth as usize / 8;
        let mut out = Vec::with_capacity(samples.len() * bytes);
        if bytes == 2 {
            for sample in samples {
                out.extend_from_slice(&sample.to_i16().to_le_bytes());
            }
        } else {
            for sample in samples {
                out.extend_from_slice(&sample.to_i24_le());
            }
        }
        out
    }

    fn format(&self) -> AudioFormat {
        self.format
    }
}

/// Encoder for `format`, if the sender can produce it
pub fn create_encoder(format: AudioFormat) -> Result<Box<dyn AudioEncoder>> {
    Ok(Box::new(PcmEncoder::new(format)?))
}

/// Whether the sender can produce `format`
pub fn can_encode(format: &AudioFormat) -> bool {
    format.codec == Codec::Pcm && matches!(format.bit_depth, 16 | 24)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm24_encode() {
        let mut encoder = PcmEncoder::new(AudioFormat::pcm(48000, 2, 24)).unwrap();
        let encoded = encoder.encode(&[Sample(0x123456), Sample(-0x123456), Sample(0), Sample::MAX]);

        assert_eq!(encoded.len(), 12);
        assert_eq!(&encoded[..3], &[0x56, 0x34, 0x12]);
        assert_eq!(&encoded[9..], &[0xFF, 0xFF, 0x7F]);
    }

    #[test]
    fn test_pcm16_encode() {
        let mut encoder = PcmEncoder::new(AudioFormat::pcm(48000, 1, 16)).unwrap();
        let encoded = encoder.encode(&[Sample::from_i16(0x1234), Sample::from_i16(-2)]);
        assert_eq!(encoded, vec![0x34, 0x12, 0xFE, 0xFF]);
    }

    #[test]
    fn test_rejects_compressed() {
        let format = AudioFormat::parse("opus", 48000, 2, None).unwrap();
        assert!(!can_encode(&format));
        assert!(matches!(create_encoder(format), Err(Error::NotSupported(_))));
        assert!(can_encode(&AudioFormat::pcm(44100, 2, 16)));
    }
}
