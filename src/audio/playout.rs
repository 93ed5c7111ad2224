// ABOUTME: Jitter-buffered playout driven by the two clock regressions
// ABOUTME: Maps ring offsets to local play times and steers the output rate

use crate::audio::ring::RingBuffer;
use crate::audio::types::AudioFormat;
use crate::sync::dll::{Dll, BW_MIN};
use crate::sync::regress::{Regression, DEFAULT_WINDOW};
use parking_lot::Mutex;
use std::sync::Arc;

/// Ring size used by receivers
pub const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;
/// Time exchanges needed before audio is played
pub const MIN_TIME_EXCHANGES: u32 = 4;
/// Timing errors fed to the loop are clamped to this many microseconds
pub const MAX_ERROR_US: f64 = 1000.0;
/// Loop period handed to the DLL, in samples
pub const DLL_PERIOD: u32 = 1000;

/// Playout shared between the network task and the output thread
pub type SharedPlayout = Arc<Mutex<Playout>>;

/// Output-side timing for one pull
#[derive(Debug, Clone, Copy, Default)]
pub struct PullTiming {
    /// Local clock now, microseconds
    pub now_us: f64,
    /// Frames already queued in the output but not yet audible
    pub buffered_frames: u64,
    /// Fixed output latency, microseconds
    pub delay_us: f64,
}

/// Result of one pull
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pull {
    /// Bytes written to the output buffer
    pub bytes: usize,
    /// True if those bytes are silence
    pub silent: bool,
    /// Rate the output should run at (stream frames are stretched by this)
    pub rate: f64,
}

/// Receiver playout state
///
/// Two regressions turn a ring offset into a local play time: the first maps
/// ring offsets to the sender timestamps carried by audio chunks, the second
/// maps sender time to local time from the time exchanges. Each pull compares
/// the play time of the read cursor with the time the pulled audio will
/// actually be heard, and the delay-locked loop turns the difference into a
/// rate correction.
#[derive(Debug)]
pub struct Playout {
    format: Option<AudioFormat>,
    stride: usize,
    ring: RingBuffer,
    index_map: Regression,
    time_map: Regression,
    time_exchanges: u32,
    resync: bool,
    dll: Dll,
    rate: f64,
}

impl Playout {
    /// Create a playout with a ring of `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            format: None,
            stride: 1,
            ring: RingBuffer::new(capacity),
            index_map: Regression::new(DEFAULT_WINDOW),
            time_map: Regression::new(DEFAULT_WINDOW),
            time_exchanges: 0,
            resync: true,
            dll: Dll::new(),
            rate: 1.0,
        }
    }

    /// Wrap for sharing
    pub fn shared(capacity: usize) -> SharedPlayout {
        Arc::new(Mutex::new(Self::new(capacity)))
    }

    /// Start a stream in `format`; drops buffered audio
    pub fn set_format(&mut self, format: AudioFormat) {
        self.stride = format.stride().max(1);
        self.dll.set_bw(BW_MIN, DLL_PERIOD, format.sample_rate);
        self.dll.reset();
        self.rate = 1.0;
        self.format = Some(format);
        self.clear();
    }

    /// Stop the stream; drops buffered audio
    pub fn end(&mut self) {
        self.format = None;
        self.clear();
    }

    /// Current stream format
    pub fn format(&self) -> Option<AudioFormat> {
        self.format
    }

    /// Drop buffered audio and wait for a fresh position
    pub fn clear(&mut self) {
        self.ring.reset();
        self.index_map.reset();
        self.resync = true;
    }

    /// Bytes per frame of the current format
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Whether the next pull will look for a new read position
    pub fn is_resyncing(&self) -> bool {
        self.resync
    }

    /// Rate from the last pull that played audio
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Completed time exchanges
    pub fn time_exchanges(&self) -> u32 {
        self.time_exchanges
    }

    /// Bytes between read and write cursor
    pub fn buffered(&self) -> i64 {
        self.ring.available()
    }

    /// Ring offset of the next byte written
    pub fn write_index(&self) -> u64 {
        self.ring.write_index()
    }

    /// Ring offset of the next byte played
    pub fn read_index(&self) -> u64 {
        self.ring.read_index()
    }

    /// Store one audio chunk stamped with the sender's play time
    ///
    /// Ignored while no stream is running.
    pub fn write_chunk(&mut self, timestamp_us: u64, data: &[u8]) {
        if self.format.is_none() || data.is_empty() {
            return;
        }
        let index = self.ring.write_index();
        self.ring.write_at(index, data);
        self.index_map.update(index as f64, timestamp_us as f64);
        self.ring.set_write_index(index + data.len() as u64);
    }

    /// Record one completed time exchange
    ///
    /// `t1`/`t4` are local send/receive times, `t2`/`t3` the sender's
    /// receive/send times.
    pub fn record_time_exchange(&mut self, t1: u64, t2: u64, t3: u64, t4: u64) {
        let server = (t2 as f64 + t3 as f64) / 2.0;
        let local = (t1 as f64 + t4 as f64) / 2.0;
        self.time_map.update(server, local);
        self.time_exchanges = self.time_exchanges.saturating_add(1);
    }

    /// Local time at which the byte at ring offset `index` should be heard
    pub fn target_local_time(&self, index: u64) -> Option<f64> {
        let server = self.index_map.calc_y(index as f64)?;
        self.time_map.calc_y(server)
    }

    /// Ring offset that should be heard at local time `local_us`
    pub fn index_at_local_time(&self, local_us: f64) -> Option<u64> {
        let server = self.time_map.calc_x(local_us)?;
        let index = self.index_map.calc_x(server)?;
        index.is_finite().then(|| index.max(0.0) as u64)
    }

    /// Fill `out` with audio or silence
    ///
    /// `out` is truncated to whole frames. Until enough time exchanges have
    /// completed, or while resyncing towards a position that is still in the
    /// future, the pull is silent. Underruns and overruns force a resync.
    pub fn process(&mut self, out: &mut [u8], timing: &PullTiming) -> Pull {
        let stride = self.stride;
        let n_bytes = out.len() / stride * stride;
        let out = &mut out[..n_bytes];
        if n_bytes == 0 {
            return Pull {
                bytes: 0,
                silent: true,
                rate: self.rate,
            };
        }

        let mut index = self.ring.read_index();
        let mut avail = self.ring.available();
        let mut err = 0.0;

        let target = match self.format {
            Some(_) if self.time_exchanges >= MIN_TIME_EXCHANGES => {
                self.target_local_time(index)
            }
            _ => None,
        };

        match (target, self.format) {
            (Some(target), Some(format)) => {
                let rate = format.sample_rate as f64;
                let current = timing.now_us
                    - timing.buffered_frames as f64 * 1e6 / rate
                    - timing.delay_us;
                err = target - current;

                if self.resync {
                    match self.index_at_local_time(current) {
                        Some(position) if target < current => {
                            index = position / stride as u64 * stride as u64;
                            self.ring.set_read_index(index);
                            avail = self.ring.available();
                            err = 0.0;
                            self.resync = false;
                            log::debug!(
                                "playout resync: read index {} ({} bytes available)",
                                index,
                                avail
                            );
                        }
                        _ => avail = 0,
                    }
                }
            }
            _ => avail = 0,
        }

        let capacity = self.ring.capacity() as i64;
        if avail < n_bytes as i64 {
            if avail > 0 {
                log::debug!("playout underrun: {} < {}", avail, n_bytes);
            }
            avail = 0;
            self.resync = true;
        } else if avail > capacity {
            log::debug!("playout overrun: {} > {}", avail, capacity);
            index += (avail - capacity) as u64;
            self.ring.set_read_index(index);
            avail = capacity;
            self.resync = true;
        }

        if avail > 0 {
            let corr = self.dll.update(err.clamp(-MAX_ERROR_US, MAX_ERROR_US));
            if corr.is_finite() && corr > 0.0 {
                self.rate = 1.0 / corr;
            }
            self.ring.read_at(index, out);
            self.ring.set_read_index(index + n_bytes as u64);
            Pull {
                bytes: n_bytes,
                silent: false,
                rate: self.rate,
            }
        } else {
            out.fill(0);
            Pull {
                bytes: n_bytes,
                silent: true,
                rate: self.rate,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 48000;

    fn playout() -> Playout {
        let mut p = Playout::new(64 * 1024);
        p.set_format(AudioFormat::pcm(RATE, 2, 16));
        p
    }

    /// Sender and receiver clocks equal; one exchange per second
    fn sync_identity(p: &mut Playout, exchanges: u32) {
        for i in 0..exchanges as u64 {
            let t = 1_000_000 + i * 1_000_000;
            p.record_time_exchange(t, t + 100, t + 200, t + 300);
        }
    }

    /// 10 ms chunks of a constant, playing from `start_us`
    fn feed(p: &mut Playout, start_us: u64, chunks: u64) {
        let bytes_per_chunk = (RATE as usize / 100) * 4;
        for i in 0..chunks {
            p.write_chunk(start_us + i * 10_000, &vec![0x11u8; bytes_per_chunk]);
        }
    }

    #[test]
    fn test_silent_before_time_sync() {
        let mut p = playout();
        sync_identity(&mut p, 3);
        feed(&mut p, 5_000_000, 10);

        let mut out = vec![0xffu8; 400];
        let pull = p.process(&mut out, &PullTiming {
            now_us: 5_050_000.0,
            ..Default::default()
        });
        assert!(pull.silent);
        assert!(out.iter().all(|&b| b == 0));
        assert!(p.is_resyncing());
    }

    #[test]
    fn test_waits_while_target_in_future() {
        let mut p = playout();
        sync_identity(&mut p, 4);
        feed(&mut p, 5_000_000, 10);

        let mut out = vec![0u8; 400];
        let pull = p.process(&mut out, &PullTiming {
            now_us: 4_000_000.0,
            ..Default::default()
        });
        assert!(pull.silent);
        assert_eq!(p.read_index(), 0);
    }

    #[test]
    fn test_resync_snaps_to_now() {
        let mut p = playout();
        sync_identity(&mut p, 4);
        feed(&mut p, 5_000_000, 10);

        // 20 ms into the buffered audio: 960 frames of 4 bytes
        let mut out = vec![0u8; 400];
        let pull = p.process(&mut out, &PullTiming {
            now_us: 5_020_000.0,
            ..Default::default()
        });
        assert!(!pull.silent);
        assert!(out.iter().all(|&b| b == 0x11));
        assert!(!p.is_resyncing());
        let expected = 960 * 4;
        let read = p.read_index() as i64 - 400;
        assert!((read - expected).abs() <= 8, "read index {}", read);
    }

    #[test]
    fn test_underrun_forces_resync() {
        let mut p = playout();
        sync_identity(&mut p, 4);
        feed(&mut p, 5_000_000, 2);

        let mut out = vec![0u8; 3000];
        let first = p.process(&mut out, &PullTiming {
            now_us: 5_001_000.0,
            ..Default::default()
        });
        assert!(!first.silent);

        let second = p.process(&mut out, &PullTiming {
            now_us: 5_017_000.0,
            ..Default::default()
        });
        assert!(second.silent);
        assert!(p.is_resyncing());

        // More audio arrives; the next pull recomputes the read index
        feed(&mut p, 5_020_000, 10);
        let third = p.process(&mut out, &PullTiming {
            now_us: 5_040_000.0,
            ..Default::default()
        });
        assert!(!third.silent);
        assert!(!p.is_resyncing());
        let expected = p.index_at_local_time(5_040_000.0).unwrap() / 4 * 4;
        assert_eq!(p.read_index(), expected + 3000);
    }

    #[test]
    fn test_rate_moves_after_second_pull() {
        let mut p = playout();
        sync_identity(&mut p, 4);
        feed(&mut p, 5_000_000, 20);

        let mut out = vec![0u8; 400];
        let first = p.process(&mut out, &PullTiming {
            now_us: 5_010_000.0,
            ..Default::default()
        });
        assert_eq!(first.rate, 1.0);

        // 100 frames later in stream time but only 1 ms later on the clock
        let second = p.process(&mut out, &PullTiming {
            now_us: 5_011_000.0,
            ..Default::default()
        });
        assert!(!second.silent);
        assert!(second.rate != 1.0);
    }

    #[test]
    fn test_overrun_skips_ahead() {
        let mut p = Playout::new(4096);
        p.set_format(AudioFormat::pcm(RATE, 2, 16));
        sync_identity(&mut p, 4);
        for i in 0..10u64 {
            p.write_chunk(5_000_000 + i * 5_000, &vec![1u8; 960]);
        }
        // Force a pull from the start without resync
        p.resync = false;
        let mut out = vec![0u8; 400];
        p.process(&mut out, &PullTiming {
            now_us: 5_000_000.0,
            ..Default::default()
        });
        assert!(p.is_resyncing());
        assert_eq!(p.read_index(), 9600 - 4096 + 400);
    }

    #[test]
    fn test_writes_ignored_without_stream() {
        let mut p = Playout::new(1024);
        p.write_chunk(1, &[1, 2, 3, 4]);
        assert_eq!(p.buffered(), 0);
    }
}
