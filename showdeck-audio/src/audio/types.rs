//! Core audio data types
//!
//! Defines the pull-based sample stream abstraction used throughout the
//! engine, and the in-memory source that decoded cues live in.
//!
//! **Format:**
//! - Samples are f32 (floating point -1.0 to 1.0)
//! - Interleaved: [L, R, L, R, ...]
//! - Every source joining the mixer uses the engine's fixed [`SampleFormat`]

use crate::error::{Error, Result};
use std::fmt;
use std::sync::Arc;

/// Sample rate and channel count of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SampleFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl SampleFormat {
    pub const fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Standard engine format (44.1kHz stereo)
    pub const fn stereo_44k() -> Self {
        Self::new(44100, 2)
    }

    /// Interleaved samples for the given duration
    pub fn samples_for_ms(&self, ms: u64) -> u64 {
        ms * self.sample_rate as u64 / 1000 * self.channels as u64
    }

    /// Duration in milliseconds of an interleaved sample count
    pub fn ms_for_samples(&self, samples: u64) -> u64 {
        let frames = samples / self.channels.max(1) as u64;
        frames * 1000 / self.sample_rate.max(1) as u64
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Hz/{}ch", self.sample_rate, self.channels)
    }
}

impl From<showdeck_common::config::FormatConfig> for SampleFormat {
    fn from(config: showdeck_common::config::FormatConfig) -> Self {
        Self::new(config.sample_rate, config.channels)
    }
}

/// A pull-based stream of interleaved f32 samples
///
/// Decorators (looping, gain, silence gating) hold an inner source and
/// delegate to it. `read` runs on the audio-delivery thread: it must be
/// bounded, must not block on I/O, and must not allocate per call.
pub trait SampleSource: Send {
    /// Sample format of this stream
    fn format(&self) -> SampleFormat;

    /// Fill `buf` with up to `buf.len()` samples
    ///
    /// Returns the number of samples written. Zero means end-of-stream.
    fn read(&mut self, buf: &mut [f32]) -> usize;

    /// Current position in interleaved samples
    fn position(&self) -> u64;

    /// Total length in interleaved samples (None = unknown or infinite)
    fn length(&self) -> Option<u64>;

    fn can_seek(&self) -> bool {
        false
    }

    /// Seek to an interleaved sample position
    fn seek(&mut self, _position: u64) -> Result<()> {
        Err(Error::Seek("source is not seekable".to_string()))
    }

    /// Samples left before end-of-stream, when the length is known
    fn remaining(&self) -> Option<u64> {
        self.length().map(|len| len.saturating_sub(self.position()))
    }
}

impl<S: SampleSource + ?Sized> SampleSource for Box<S> {
    fn format(&self) -> SampleFormat {
        (**self).format()
    }

    fn read(&mut self, buf: &mut [f32]) -> usize {
        (**self).read(buf)
    }

    fn position(&self) -> u64 {
        (**self).position()
    }

    fn length(&self) -> Option<u64> {
        (**self).length()
    }

    fn can_seek(&self) -> bool {
        (**self).can_seek()
    }

    fn seek(&mut self, position: u64) -> Result<()> {
        (**self).seek(position)
    }

    fn remaining(&self) -> Option<u64> {
        (**self).remaining()
    }
}

/// Decoded audio held entirely in RAM
///
/// The sample data is shared (`Arc<[f32]>`), so the same decoded effect can
/// back several concurrent players without copying.
#[derive(Debug, Clone)]
pub struct BufferSource {
    samples: Arc<[f32]>,
    format: SampleFormat,
    position: usize,
}

impl BufferSource {
    pub fn new(samples: impl Into<Arc<[f32]>>, format: SampleFormat) -> Self {
        Self {
            samples: samples.into(),
            format,
            position: 0,
        }
    }

    /// Get duration in milliseconds
    pub fn duration_ms(&self) -> u64 {
        self.format.ms_for_samples(self.samples.len() as u64)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }
}

impl SampleSource for BufferSource {
    fn format(&self) -> SampleFormat {
        self.format
    }

    fn read(&mut self, buf: &mut [f32]) -> usize {
        let available = self.samples.len().saturating_sub(self.position);
        let n = available.min(buf.len());
        buf[..n].copy_from_slice(&self.samples[self.position..self.position + n]);
        self.position += n;
        n
    }

    fn position(&self) -> u64 {
        self.position as u64
    }

    fn length(&self) -> Option<u64> {
        Some(self.samples.len() as u64)
    }

    fn can_seek(&self) -> bool {
        true
    }

    fn seek(&mut self, position: u64) -> Result<()> {
        if position > self.samples.len() as u64 {
            return Err(Error::Seek(format!(
                "position {} beyond length {}",
                position,
                self.samples.len()
            )));
        }
        // Keep frame alignment so channels never swap
        let channels = self.format.channels.max(1) as u64;
        self.position = (position - position % channels) as usize;
        Ok(())
    }
}
