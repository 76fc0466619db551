//! Format conversion: channel mapping and resampling with rubato
//!
//! Every source must match the engine's [`SampleFormat`] before it joins
//! the mixer. Conversion runs once, at load time.
//!
//! [`StreamResampler`] is the exception: it converts the mixed output on
//! the fly for a device that cannot run at the engine rate.

use super::types::SampleFormat;
use crate::error::{Error, Result};
use rubato::{FastFixedIn, Resampler as RubatoResampler};
use tracing::debug;

/// Audio resampler using rubato for sample rate conversion.
pub struct Resampler;

impl Resampler {
    /// Convert interleaved audio to the target format.
    ///
    /// Channel mapping runs first (cheaper to resample fewer channels when
    /// downmixing, and mono→stereo duplication is exact either way).
    pub fn convert(
        input: Vec<f32>,
        input_rate: u32,
        input_channels: u16,
        target: SampleFormat,
    ) -> Result<Vec<f32>> {
        let mapped = Self::map_channels(input, input_channels, target.channels);
        Self::resample(mapped, input_rate, target.sample_rate, target.channels)
    }

    /// Resample interleaved audio.
    ///
    /// If input is already at the output rate, returns it untouched.
    pub fn resample(
        input: Vec<f32>,
        input_rate: u32,
        output_rate: u32,
        channels: u16,
    ) -> Result<Vec<f32>> {
        if input_rate == output_rate || input.is_empty() {
            return Ok(input);
        }

        debug!(
            "Resampling from {}Hz to {}Hz ({} channels)",
            input_rate, output_rate, channels
        );

        // De-interleave samples for rubato (which expects planar format)
        let planar_input = Self::deinterleave(&input, channels);
        let input_frames = planar_input[0].len();

        let mut resampler = Self::create_resampler(input_rate, output_rate, channels, input_frames)?;

        let planar_output = resampler
            .process(&planar_input, None)
            .map_err(|e| Error::Decode(format!("Resampling failed: {}", e)))?;

        let interleaved_output = Self::interleave(planar_output);

        debug!(
            "Resampled {} input frames to {} output frames",
            input_frames,
            interleaved_output.len() / channels as usize
        );

        Ok(interleaved_output)
    }

    /// Map interleaved audio between channel counts.
    ///
    /// - mono → N: duplicate into every channel
    /// - N → mono: average all channels
    /// - otherwise: copy the first min(N, M) channels, zero the rest
    pub fn map_channels(input: Vec<f32>, from: u16, to: u16) -> Vec<f32> {
        if from == to || from == 0 || to == 0 {
            return input;
        }

        let from = from as usize;
        let to = to as usize;
        let frames = input.len() / from;
        let mut output = Vec::with_capacity(frames * to);

        for frame in input.chunks_exact(from) {
            if from == 1 {
                output.extend(std::iter::repeat(frame[0]).take(to));
            } else if to == 1 {
                output.push(frame.iter().sum::<f32>() / from as f32);
            } else {
                for ch in 0..to {
                    output.push(frame.get(ch).copied().unwrap_or(0.0));
                }
            }
        }

        output
    }

    /// Create a rubato resampler.
    ///
    /// Uses FastFixedIn for efficiency (good quality/performance tradeoff).
    fn create_resampler(
        input_rate: u32,
        output_rate: u32,
        channels: u16,
        chunk_size: usize,
    ) -> Result<FastFixedIn<f32>> {
        FastFixedIn::<f32>::new(
            output_rate as f64 / input_rate as f64,
            1.0, // max_relative_ratio (no runtime changes)
            rubato::PolynomialDegree::Septic,
            chunk_size,
            channels as usize,
        )
        .map_err(|e| Error::Decode(format!("Failed to create resampler: {}", e)))
    }

    /// Convert interleaved samples to planar format.
    ///
    /// Input:  [L, R, L, R, L, R, ...]
    /// Output: [[L, L, L, ...], [R, R, R, ...]]
    fn deinterleave(samples: &[f32], channels: u16) -> Vec<Vec<f32>> {
        let num_channels = channels.max(1) as usize;
        let num_frames = samples.len() / num_channels;

        let mut planar = vec![Vec::with_capacity(num_frames); num_channels];

        for frame in samples.chunks_exact(num_channels) {
            for (ch_idx, sample) in frame.iter().enumerate() {
                planar[ch_idx].push(*sample);
            }
        }

        planar
    }

    /// Convert planar samples to interleaved format.
    fn interleave(planar: Vec<Vec<f32>>) -> Vec<f32> {
        if planar.is_empty() {
            return Vec::new();
        }

        let num_channels = planar.len();
        let num_frames = planar[0].len();
        let mut interleaved = Vec::with_capacity(num_frames * num_channels);

        for frame_idx in 0..num_frames {
            for channel in &planar {
                interleaved.push(channel[frame_idx]);
            }
        }

        interleaved
    }
}

/// Input frames pulled per conversion step
const STREAM_CHUNK_FRAMES: usize = 512;

/// Streaming rate conversion for an output callback
///
/// Pulls fixed chunks at the engine rate and hands out any number of frames
/// at the device rate. Every buffer is allocated up front, so [`fill`]
/// never allocates.
///
/// [`fill`]: StreamResampler::fill
pub struct StreamResampler {
    resampler: FastFixedIn<f32>,
    channels: usize,
    input: Vec<f32>,
    planar_in: Vec<Vec<f32>>,
    planar_out: Vec<Vec<f32>>,
    /// Converted, interleaved frames not yet handed out
    pending: Vec<f32>,
    pending_len: usize,
    pending_pos: usize,
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32, channels: u16) -> Result<Self> {
        let channels = channels.max(1) as usize;
        let resampler = Resampler::create_resampler(from_rate, to_rate, channels as u16, STREAM_CHUNK_FRAMES)?;
        let out_frames = resampler.output_frames_max();

        Ok(Self {
            resampler,
            channels,
            input: vec![0.0; STREAM_CHUNK_FRAMES * channels],
            planar_in: vec![vec![0.0; STREAM_CHUNK_FRAMES]; channels],
            planar_out: vec![vec![0.0; out_frames]; channels],
            pending: vec![0.0; out_frames * channels],
            pending_len: 0,
            pending_pos: 0,
        })
    }

    /// Fill `out` with converted audio, calling `pull` for engine-rate input
    ///
    /// A conversion failure fills the rest of `out` with silence.
    pub fn fill(&mut self, out: &mut [f32], mut pull: impl FnMut(&mut [f32])) {
        let mut written = 0;
        while written < out.len() {
            if self.pending_pos >= self.pending_len && !self.convert_chunk(&mut pull) {
                out[written..].fill(0.0);
                return;
            }
            let n = (self.pending_len - self.pending_pos).min(out.len() - written);
            out[written..written + n]
                .copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + n]);
            self.pending_pos += n;
            written += n;
        }
    }

    fn convert_chunk(&mut self, pull: &mut impl FnMut(&mut [f32])) -> bool {
        pull(&mut self.input);
        for (i, frame) in self.input.chunks_exact(self.channels).enumerate() {
            for (ch, sample) in frame.iter().enumerate() {
                self.planar_in[ch][i] = *sample;
            }
        }

        let frames = match self
            .resampler
            .process_into_buffer(&self.planar_in, &mut self.planar_out, None)
        {
            Ok((_, frames)) => frames,
            Err(_) => return false,
        };

        for i in 0..frames {
            for ch in 0..self.channels {
                self.pending[i * self.channels + ch] = self.planar_out[ch][i];
            }
        }
        self.pending_len = frames * self.channels;
        self.pending_pos = 0;
        frames > 0
    }
}
