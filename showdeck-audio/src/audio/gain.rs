//! Lock-free gain control and the gain decorator
//!
//! Volumes are written from control threads and read once per buffer on
//! the audio thread, so they are stored as f32 bits in an atomic.

use super::types::{SampleFormat, SampleSource};
use crate::error::Result;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Shared volume, clamped to [0.0, 1.0]
///
/// Cloning is cheap (single `Arc` increment) and every clone controls the
/// same value.
#[derive(Debug, Clone)]
pub struct Gain {
    bits: Arc<AtomicU32>,
}

impl Gain {
    pub fn new(value: f32) -> Self {
        Self {
            bits: Arc::new(AtomicU32::new(sanitize(value).to_bits())),
        }
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    /// Set the gain; out-of-range and NaN values are clamped
    pub fn set(&self, value: f32) {
        self.bits.store(sanitize(value).to_bits(), Ordering::Relaxed);
    }
}

fn sanitize(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

impl Default for Gain {
    fn default() -> Self {
        Self::new(1.0)
    }
}

/// Decorator applying a shared [`Gain`] to an inner source
pub struct GainSource<S> {
    inner: S,
    gain: Gain,
}

impl<S: SampleSource> GainSource<S> {
    pub fn new(inner: S, gain: Gain) -> Self {
        Self { inner, gain }
    }
}

impl<S: SampleSource> SampleSource for GainSource<S> {
    fn format(&self) -> SampleFormat {
        self.inner.format()
    }

    fn read(&mut self, buf: &mut [f32]) -> usize {
        let n = self.inner.read(buf);
        let gain = self.gain.get();
        if gain != 1.0 {
            for sample in &mut buf[..n] {
                *sample *= gain;
            }
        }
        n
    }

    fn position(&self) -> u64 {
        self.inner.position()
    }

    fn length(&self) -> Option<u64> {
        self.inner.length()
    }

    fn can_seek(&self) -> bool {
        self.inner.can_seek()
    }

    fn seek(&mut self, position: u64) -> Result<()> {
        self.inner.seek(position)
    }
}
