// ABOUTME: Local playback stream abstraction and a clocked writer implementation
// ABOUTME: Pulls from the playout on its own thread at the stream's nominal period

use crate::audio::playout::{PullTiming, SharedPlayout};
use crate::audio::types::AudioFormat;
use crate::error::Error;
use crate::sync::MonotonicClock;
use crate::Result;
use parking_lot::Mutex;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Frames pulled per output cycle at nominal rate
pub const DEFAULT_PERIOD_FRAMES: u32 = 1024;

/// A running local playback stream
///
/// Dropping the stream stops it.
pub trait OutputStream: Send {
    /// Format the stream was created with
    fn format(&self) -> AudioFormat;
}

/// Creates local playback streams when a sender starts streaming
pub trait OutputFactory: Send + Sync {
    /// Start pulling audio in `format` from `playout`
    fn create(
        &self,
        format: AudioFormat,
        playout: SharedPlayout,
        clock: MonotonicClock,
    ) -> Result<Box<dyn OutputStream>>;
}

/// Shared byte sink for [`ClockedOutput`]
pub type SharedSink = Arc<Mutex<Box<dyn Write + Send>>>;

/// Factory for [`ClockedOutput`] streams writing into one sink
pub struct ClockedOutputFactory {
    sink: SharedSink,
    period_frames: u32,
    latency_us: f64,
}

impl ClockedOutputFactory {
    /// Write pulled PCM into `sink`
    pub fn new(sink: Box<dyn Write + Send>) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink)),
            period_frames: DEFAULT_PERIOD_FRAMES,
            latency_us: 0.0,
        }
    }

    /// Discard all audio
    pub fn discard() -> Self {
        Self::new(Box::new(std::io::sink()))
    }

    /// Set the frames pulled per cycle
    pub fn period_frames(mut self, frames: u32) -> Self {
        self.period_frames = frames.max(1);
        self
    }

    /// Set the latency reported to the playout
    pub fn latency_us(mut self, latency: f64) -> Self {
        self.latency_us = latency;
        self
    }
}

impl OutputFactory for ClockedOutputFactory {
    fn create(
        &self,
        format: AudioFormat,
        playout: SharedPlayout,
        clock: MonotonicClock,
    ) -> Result<Box<dyn OutputStream>> {
        let output = ClockedOutput::start(
            format,
            playout,
            clock,
            self.sink.clone(),
            self.period_frames,
            self.latency_us,
        )?;
        Ok(Box::new(output))
    }
}

/// Output that pulls a period of audio every `period / sample_rate` seconds
///
/// Stands in for a hardware clock: the period is fixed, and the playout's
/// rate decides how many stream frames make up one period.
pub struct ClockedOutput {
    format: AudioFormat,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ClockedOutput {
    fn start(
        format: AudioFormat,
        playout: SharedPlayout,
        clock: MonotonicClock,
        sink: SharedSink,
        period_frames: u32,
        latency_us: f64,
    ) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let thread = std::thread::Builder::new()
            .name("sendspin-output".into())
            .spawn(move || {
                run_output(
                    format,
                    playout,
                    clock,
                    sink,
                    period_frames,
                    latency_us,
                    thread_stop,
                )
            })
            .map_err(|e| Error::Output(format!("failed to spawn output thread: {}", e)))?;

        log::info!(
            "output started: {} {} Hz, {} ch, {} bit",
            format.codec.as_str(),
            format.sample_rate,
            format.channels,
            format.bit_depth
        );
        Ok(Self {
            format,
            stop,
            thread: Some(thread),
        })
    }
}

impl OutputStream for ClockedOutput {
    fn format(&self) -> AudioFormat {
        self.format
    }
}

impl Drop for ClockedOutput {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        log::info!("output stopped");
    }
}

fn run_output(
    format: AudioFormat,
    playout: SharedPlayout,
    clock: MonotonicClock,
    sink: SharedSink,
    period_frames: u32,
    latency_us: f64,
    stop: Arc<AtomicBool>,
) {
    let stride = format.stride();
    let period = Duration::from_secs_f64(period_frames as f64 / format.sample_rate.max(1) as f64);
    let mut buf = vec![0u8; period_frames as usize * stride * 2];
    let mut carry = 0.0f64;
    let mut next = Instant::now();
    let mut write_failed = false;

    while !stop.load(Ordering::Acquire) {
        let pull = {
            let mut playout = playout.lock();
            let wanted = period_frames as f64 / playout.rate() + carry;
            let frames = wanted.floor().max(0.0);
            carry = wanted - frames;
            let len = (frames as usize * stride).min(buf.len());
            let timing = PullTiming {
                now_us: clock.now_us_f64(),
                buffered_frames: 0,
                delay_us: latency_us,
            };
            playout.process(&mut buf[..len], &timing)
        };

        if pull.bytes > 0 {
            if let Err(e) = sink.lock().write_all(&buf[..pull.bytes]) {
                if !write_failed {
                    log::warn!("output write failed: {}", e);
                    write_failed = true;
                }
            }
        }

        next += period;
        let now = Instant::now();
        if next > now {
            std::thread::sleep(next - now);
        } else {
            next = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::playout::Playout;

    struct Collect(Arc<Mutex<Vec<u8>>>);

    impl Write for Collect {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_clocked_output_writes_silence_until_synced() {
        let collected = Arc::new(Mutex::new(Vec::new()));
        let factory = ClockedOutputFactory::new(Box::new(Collect(collected.clone())))
            .period_frames(48);

        let format = AudioFormat::pcm(48000, 2, 16);
        let playout = Playout::shared(4096);
        playout.lock().set_format(format);

        let stream = factory
            .create(format, playout, MonotonicClock::new())
            .unwrap();
        assert_eq!(stream.format(), format);
        std::thread::sleep(Duration::from_millis(30));
        drop(stream);

        let bytes = collected.lock();
        assert!(!bytes.is_empty());
        assert_eq!(bytes.len() % 4, 0);
        assert!(bytes.iter().all(|&b| b == 0));
    }
}
