// ABOUTME: Audio sources feeding the sender's streams
// ABOUTME: Sine test tone and silence, one instance per client stream

use crate::audio::types::{AudioFormat, Sample};
use std::f64::consts::PI;

/// Produces interleaved samples for one stream
pub trait AudioSource: Send {
    /// Read the next `frames` frames, interleaved over `channels()`
    ///
    /// Returns `None` once the source is exhausted.
    fn read_chunk(&mut self, frames: usize) -> Option<Vec<Sample>>;

    /// Sample rate in Hz
    fn sample_rate(&self) -> u32;

    /// Interleaved channel count
    fn channels(&self) -> u32;

    /// Restart from the beginning, if the source supports it
    fn reset(&mut self) {}
}

/// Creates a source for each stream the sender starts
pub trait SourceFactory: Send + Sync {
    /// A source producing audio in `format`
    fn create(&self, format: &AudioFormat) -> Box<dyn AudioSource>;
}

/// Sine wave generator
pub struct TestToneSource {
    frequency: f64,
    sample_rate: u32,
    channels: u32,
    phase: f64,
    amplitude: f64,
}

impl TestToneSource {
    /// Tone of `frequency` Hz
    pub fn new(frequency: f64, sample_rate: u32, channels: u32) -> Self {
        Self {
            frequency,
            sample_rate,
            channels: channels.max(1),
            phase: 0.0,
            // half scale leaves headroom
            amplitude: 0.5 * Sample::MAX.0 as f64,
        }
    }

    /// Set the amplitude (0.0 to 1.0)
    pub fn with_amplitude(mut self, amplitude: f64) -> Self {
        self.amplitude = amplitude.clamp(0.0, 1.0) * Sample::MAX.0 as f64;
        self
    }
}

impl AudioSource for TestToneSource {
    fn read_chunk(&mut self, frames: usize) -> Option<Vec<Sample>> {
        let channels = self.channels as usize;
        let mut samples = Vec::with_capacity(frames * channels);
        let step = 2.0 * PI * self.frequency / self.sample_rate.max(1) as f64;

        for _ in 0..frames {
            let sample = Sample((self.phase.sin() * self.amplitude) as i32);
            samples.extend(std::iter::repeat(sample).take(channels));

            self.phase += step;
            if self.phase >= 2.0 * PI {
                self.phase -= 2.0 * PI;
            }
        }
        Some(samples)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u32 {
        self.channels
    }

    fn reset(&mut self) {
        self.phase = 0.0;
    }
}

/// Endless silence
pub struct SilenceSource {
    sample_rate: u32,
    channels: u32,
}

impl SilenceSource {
    /// Silence in the given layout
    pub fn new(sample_rate: u32, channels: u32) -> Self {
        Self {
            sample_rate,
            channels: channels.max(1),
        }
    }
}

impl AudioSource for SilenceSource {
    fn read_chunk(&mut self, frames: usize) -> Option<Vec<Sample>> {
        Some(vec![Sample::ZERO; frames * self.channels as usize])
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u32 {
        self.channels
    }
}

/// Test tone at a fixed frequency, or silence when the frequency is 0
#[derive(Debug, Clone, Copy)]
pub struct ToneFactory {
    frequency: f64,
}

impl ToneFactory {
    /// Tone factory for `frequency` Hz
    pub fn new(frequency: f64) -> Self {
        Self {
            frequency: frequency.max(0.0),
        }
    }
}

impl SourceFactory for ToneFactory {
    fn create(&self, format: &AudioFormat) -> Box<dyn AudioSource> {
        if self.frequency > 0.0 {
            Box::new(TestToneSource::new(
                self.frequency,
                format.sample_rate,
                format.channels,
            ))
        } else {
            Box::new(SilenceSource::new(format.sample_rate, format.channels))
        }
    }
}
