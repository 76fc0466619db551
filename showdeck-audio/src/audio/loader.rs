//! Source loading: file path → format-converted [`SampleSource`]
//!
//! The engine only ever sees the [`SourceLoader`] trait, so hosts and tests
//! can substitute their own decoders.

use super::decoder::SimpleDecoder;
use super::resampler::Resampler;
use super::types::{BufferSource, SampleFormat, SampleSource};
use crate::error::Result;
use std::path::Path;
use tracing::debug;

/// Opens a file as a sample stream in the engine's format
pub trait SourceLoader: Send + Sync {
    /// Load and convert `path`
    ///
    /// Called outside the audio-delivery path; may block on I/O.
    ///
    /// # Errors
    /// `Error::Decode` when the file cannot be read, decoded, or converted.
    fn load(&self, path: &Path, format: SampleFormat) -> Result<Box<dyn SampleSource>>;
}

/// Default loader: symphonia decode + rubato conversion into RAM
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaLoader;

impl SymphoniaLoader {
    /// Decode and convert, returning the concrete in-memory source
    pub fn load_buffer(&self, path: &Path, format: SampleFormat) -> Result<BufferSource> {
        let decoded = SimpleDecoder::decode_file(path)?;
        let samples = Resampler::convert(
            decoded.samples,
            decoded.sample_rate,
            decoded.channels,
            format,
        )?;

        debug!(
            "Loaded {} ({}Hz/{}ch -> {}, {} samples)",
            path.display(),
            decoded.sample_rate,
            decoded.channels,
            format,
            samples.len()
        );

        Ok(BufferSource::new(samples, format))
    }
}

impl SourceLoader for SymphoniaLoader {
    fn load(&self, path: &Path, format: SampleFormat) -> Result<Box<dyn SampleSource>> {
        Ok(Box::new(self.load_buffer(path, format)?))
    }
}
