//! Audio test file generation utilities
//!
//! Deterministic WAV files with known characteristics, plus in-memory
//! sources for tests that bypass decoding.

use hound::{WavSpec, WavWriter};
use showdeck_audio::audio::{BufferSource, SampleFormat};
use std::f32::consts::PI;
use std::path::Path;

/// Generate a sine wave WAV file (16-bit, frequency in Hz, amplitude 0.0-1.0)
pub fn generate_sine_wav<P: AsRef<Path>>(
    path: P,
    sample_rate: u32,
    channels: u16,
    duration_ms: u64,
    frequency_hz: f32,
    amplitude: f32,
) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;

    let total_frames = sample_rate as u64 * duration_ms / 1000;
    let scale = amplitude * i16::MAX as f32;
    for frame in 0..total_frames {
        let t = frame as f32 / sample_rate as f32;
        let value = ((2.0 * PI * frequency_hz * t).sin() * scale) as i16;
        for _ in 0..channels {
            writer.write_sample(value)?;
        }
    }

    writer.finalize()
}

/// Generate a WAV whose first frame is `marker` and the rest silence
///
/// Lets a test confirm playback starts at sample 0.
pub fn generate_marked_wav<P: AsRef<Path>>(
    path: P,
    sample_rate: u32,
    channels: u16,
    duration_ms: u64,
    marker: f32,
) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;

    let total_frames = sample_rate as u64 * duration_ms / 1000;
    let marker = (marker * i16::MAX as f32) as i16;
    for frame in 0..total_frames {
        let value = if frame == 0 { marker } else { 0 };
        for _ in 0..channels {
            writer.write_sample(value)?;
        }
    }

    writer.finalize()
}

/// `frames` frames of a constant value
pub fn constant_source(format: SampleFormat, frames: usize, value: f32) -> BufferSource {
    BufferSource::new(vec![value; frames * format.channels as usize], format)
}

/// `frames` frames counting up from 1.0 (frame index + 1, same on every channel)
pub fn ramp_source(format: SampleFormat, frames: usize) -> BufferSource {
    let channels = format.channels as usize;
    let samples: Vec<f32> = (0..frames * channels)
        .map(|i| (i / channels + 1) as f32)
        .collect();
    BufferSource::new(samples, format)
}
