// ABOUTME: WebSocket frame encoding and incremental decoding (RFC 6455)
// ABOUTME: Handles masking and 7/16/64-bit payload lengths over arbitrary chunking

use crate::error::Error;
use crate::Result;

/// Default upper bound for a single frame payload
pub const DEFAULT_MAX_FRAME_SIZE: u64 = 16 * 1024 * 1024;

const FIN: u8 = 0x80;
const RSV_MASK: u8 = 0x70;
const OPCODE_MASK: u8 = 0x0f;
const MASK_BIT: u8 = 0x80;
const LEN_MASK: u8 = 0x7f;
const LEN_16: u8 = 126;
const LEN_64: u8 = 127;

/// WebSocket frame opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Continuation of a fragmented message
    Continuation,
    /// UTF-8 text
    Text,
    /// Binary data
    Binary,
    /// Connection close
    Close,
    /// Ping, answered with a pong carrying the same payload
    Ping,
    /// Pong
    Pong,
    /// Reserved opcode, passed through to the session layer
    Reserved(u8),
}

impl Opcode {
    /// Decode the low nibble of the first frame byte
    pub fn from_u8(value: u8) -> Self {
        match value & OPCODE_MASK {
            0x0 => Opcode::Continuation,
            0x1 => Opcode::Text,
            0x2 => Opcode::Binary,
            0x8 => Opcode::Close,
            0x9 => Opcode::Ping,
            0xa => Opcode::Pong,
            other => Opcode::Reserved(other),
        }
    }

    /// Wire value
    pub fn as_u8(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xa,
            Opcode::Reserved(v) => v & OPCODE_MASK,
        }
    }

    /// Control frames (close, ping, pong and reserved 0xb-0xf)
    pub fn is_control(self) -> bool {
        self.as_u8() & 0x8 != 0
    }
}

/// A decoded frame with its payload already unmasked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// FIN bit
    pub fin: bool,
    /// Frame opcode
    pub opcode: Opcode,
    /// Unmasked payload
    pub payload: Vec<u8>,
}

/// XOR `data` with the 4-byte mask, cycling through it
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[i & 3];
    }
}

/// Build one complete frame (FIN set) from a list of payload buffers
///
/// With `mask` the mask bit is set, the key follows the length and the
/// payload is XORed with it. Initiators must mask, acceptors must not.
pub fn encode_frame(opcode: Opcode, buffers: &[&[u8]], mask: Option<[u8; 4]>) -> Vec<u8> {
    let len: usize = buffers.iter().map(|b| b.len()).sum();
    let mut out = Vec::with_capacity(len + 14);

    out.push(FIN | opcode.as_u8());

    let mask_bit = if mask.is_some() { MASK_BIT } else { 0 };
    if len < LEN_16 as usize {
        out.push(mask_bit | len as u8);
    } else if len <= u16::MAX as usize {
        out.push(mask_bit | LEN_16);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(mask_bit | LEN_64);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }

    if let Some(key) = mask {
        out.extend_from_slice(&key);
    }

    let start = out.len();
    for buf in buffers {
        out.extend_from_slice(buf);
    }
    if let Some(key) = mask {
        apply_mask(&mut out[start..], key);
    }
    out
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    /// Two fixed header bytes
    Header,
    /// Extended length and/or masking key
    Extended {
        fin: bool,
        opcode: Opcode,
        len7: u8,
        len_bytes: usize,
        masked: bool,
    },
    /// Payload bytes
    Payload {
        fin: bool,
        opcode: Opcode,
        mask: Option<[u8; 4]>,
    },
}

/// Resumable frame decoder
///
/// The decoder always knows exactly how many more bytes it needs
/// ([`FrameDecoder::wanted`]), so a reader can pull no more than one frame's
/// worth from the socket and stop at any byte boundary.
#[derive(Debug)]
pub struct FrameDecoder {
    stage: Stage,
    buf: Vec<u8>,
    wanted: usize,
    max_frame_size: u64,
}

impl FrameDecoder {
    /// Create a decoder rejecting payloads above `max_frame_size`
    pub fn new(max_frame_size: u64) -> Self {
        Self {
            stage: Stage::Header,
            buf: Vec::with_capacity(14),
            wanted: 2,
            max_frame_size,
        }
    }

    /// Bytes still needed to finish the current stage
    pub fn wanted(&self) -> usize {
        self.wanted
    }

    /// Drop any partial frame
    pub fn reset(&mut self) {
        self.stage = Stage::Header;
        self.buf.clear();
        self.wanted = 2;
    }

    /// Feed at most [`wanted`](Self::wanted) bytes
    ///
    /// Returns a frame when `data` completes one.
    pub fn push(&mut self, data: &[u8]) -> Result<Option<Frame>> {
        if data.len() > self.wanted {
            return Err(Error::Protocol(format!(
                "decoder fed {} bytes, wanted {}",
                data.len(),
                self.wanted
            )));
        }
        self.buf.extend_from_slice(data);
        self.wanted -= data.len();
        if self.wanted > 0 {
            return Ok(None);
        }

        match self.stage {
            Stage::Header => {
                let b0 = self.buf[0];
                let b1 = self.buf[1];
                if b0 & RSV_MASK != 0 {
                    return Err(Error::Protocol(format!(
                        "reserved bits set in frame header: {:#04x}",
                        b0
                    )));
                }
                let fin = b0 & FIN != 0;
                let opcode = Opcode::from_u8(b0);
                let masked = b1 & MASK_BIT != 0;
                let len7 = b1 & LEN_MASK;
                let len_bytes = match len7 {
                    LEN_16 => 2,
                    LEN_64 => 8,
                    _ => 0,
                };
                self.buf.clear();

                let extra = len_bytes + if masked { 4 } else { 0 };
                if extra > 0 {
                    self.stage = Stage::Extended {
                        fin,
                        opcode,
                        len7,
                        len_bytes,
                        masked,
                    };
                    self.wanted = extra;
                    Ok(None)
                } else {
                    self.begin_payload(fin, opcode, None, len7 as u64)
                }
            }
            Stage::Extended {
                fin,
                opcode,
                len7,
                len_bytes,
                masked,
            } => {
                let len = match len_bytes {
                    2 => u16::from_be_bytes([self.buf[0], self.buf[1]]) as u64,
                    8 => {
                        let mut b = [0u8; 8];
                        b.copy_from_slice(&self.buf[..8]);
                        let len = u64::from_be_bytes(b);
                        if len >> 63 != 0 {
                            return Err(Error::Protocol(
                                "64-bit frame length has the top bit set".into(),
                            ));
                        }
                        len
                    }
                    _ => len7 as u64,
                };
                let mask = masked.then(|| {
                    let mut key = [0u8; 4];
                    key.copy_from_slice(&self.buf[len_bytes..len_bytes + 4]);
                    key
                });
                self.buf.clear();
                self.begin_payload(fin, opcode, mask, len)
            }
            Stage::Payload { fin, opcode, mask } => {
                let mut payload = std::mem::take(&mut self.buf);
                if let Some(key) = mask {
                    apply_mask(&mut payload, key);
                }
                self.reset();
                Ok(Some(Frame {
                    fin,
                    opcode,
                    payload,
                }))
            }
        }
    }

    fn begin_payload(
        &mut self,
        fin: bool,
        opcode: Opcode,
        mask: Option<[u8; 4]>,
        len: u64,
    ) -> Result<Option<Frame>> {
        if opcode.is_control() && len > 125 {
            return Err(Error::Protocol(format!(
                "control frame payload of {} bytes",
                len
            )));
        }
        if len > self.max_frame_size {
            return Err(Error::Protocol(format!(
                "frame payload of {} bytes exceeds limit of {}",
                len, self.max_frame_size
            )));
        }
        if len == 0 {
            self.reset();
            return Ok(Some(Frame {
                fin,
                opcode,
                payload: Vec::new(),
            }));
        }
        self.stage = Stage::Payload { fin, opcode, mask };
        self.buf.reserve(len as usize);
        self.wanted = len as usize;
        Ok(None)
    }

    /// Decode an arbitrary chunk, appending every completed frame
    pub fn decode(&mut self, mut input: &[u8], frames: &mut Vec<Frame>) -> Result<()> {
        while !input.is_empty() {
            let take = self.wanted.min(input.len());
            let (head, rest) = input.split_at(take);
            if let Some(frame) = self.push(head)? {
                frames.push(frame);
            }
            input = rest;
        }
        Ok(())
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(bytes: &[u8]) -> Vec<Frame> {
        let mut decoder = FrameDecoder::default();
        let mut frames = Vec::new();
        decoder.decode(bytes, &mut frames).unwrap();
        frames
    }

    #[test]
    fn test_small_unmasked_header() {
        let frame = encode_frame(Opcode::Text, &[b"hello"], None);
        assert_eq!(frame[0], 0x81);
        assert_eq!(frame[1], 5);
        assert_eq!(&frame[2..], b"hello");
    }

    #[test]
    fn test_masked_header_and_payload() {
        let mask = [1, 2, 3, 4];
        let frame = encode_frame(Opcode::Binary, &[&[0, 0, 0, 0, 0]], Some(mask));
        assert_eq!(frame[0], 0x82);
        assert_eq!(frame[1], 0x80 | 5);
        assert_eq!(&frame[2..6], &mask);
        assert_eq!(&frame[6..], &[1, 2, 3, 4, 1]);
    }

    #[test]
    fn test_length_classes() {
        let payload = vec![7u8; 126];
        let frame = encode_frame(Opcode::Binary, &[&payload], None);
        assert_eq!(frame[1], 126);
        assert_eq!(u16::from_be_bytes([frame[2], frame[3]]), 126);

        let payload = vec![7u8; 65536];
        let frame = encode_frame(Opcode::Binary, &[&payload], None);
        assert_eq!(frame[1], 127);
        assert_eq!(frame.len(), 2 + 8 + 65536);
    }

    #[test]
    fn test_multiple_buffers_form_one_payload() {
        let frame = encode_frame(Opcode::Binary, &[b"ab", b"", b"cd"], Some([9, 9, 9, 9]));
        let frames = decode_all(&frame);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, b"abcd");
    }

    #[test]
    fn test_empty_payload() {
        let frames = decode_all(&encode_frame(Opcode::Ping, &[], None));
        assert_eq!(frames[0].opcode, Opcode::Ping);
        assert!(frames[0].payload.is_empty());
    }

    #[test]
    fn test_reserved_bits_rejected() {
        let mut decoder = FrameDecoder::default();
        let mut frames = Vec::new();
        let err = decoder.decode(&[0xc1, 0x00], &mut frames).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let mut decoder = FrameDecoder::new(10);
        let frame = encode_frame(Opcode::Binary, &[&[0u8; 11]], None);
        let mut frames = Vec::new();
        assert!(decoder.decode(&frame, &mut frames).is_err());
    }

    #[test]
    fn test_push_more_than_wanted_is_an_error() {
        let mut decoder = FrameDecoder::default();
        assert!(decoder.push(&[0x81, 0x00, 0x00]).is_err());
    }

    #[test]
    fn test_opcode_round_trip() {
        for v in 0u8..16 {
            assert_eq!(Opcode::from_u8(v).as_u8(), v);
        }
        assert!(Opcode::Close.is_control());
        assert!(!Opcode::Text.is_control());
    }
}
