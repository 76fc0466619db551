//! Error types for showdeck-audio
//!
//! Only `BackendExhausted` is expected to reach the host application.
//! Everything else is recovered inside the engine and logged.

use thiserror::Error;

/// Main error type for the audio engine
#[derive(Error, Debug)]
pub enum Error {
    /// Requested device id no longer enumerates (normal fallback trigger)
    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    /// Device accepted initialization but never pulled a sample
    #[error("No audio flow from '{device}' within {window_ms}ms")]
    FlowNotEstablished { device: String, window_ms: u64 },

    /// Device pulled briefly, then stopped
    #[error("Audio flow stalled on '{device}': {successes}/{checks} checks advanced")]
    FlowStalled {
        device: String,
        successes: u32,
        checks: u32,
    },

    /// A cue's file failed to load or convert
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Every output tier failed
    #[error("All audio output backends failed: {}", attempts.join("; "))]
    BackendExhausted { attempts: Vec<String> },

    /// Backend API failure (open, build, play, pause)
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// A source does not match the mixer's sample format
    #[error("Sample format mismatch: expected {expected}, got {actual}")]
    FormatMismatch { expected: String, actual: String },

    /// Normal-priority queue is at its limit
    #[error("Cue queue full ({limit} waiting)")]
    QueueFull { limit: usize },

    /// No effect is playing under this id
    #[error("Unknown effect: {0}")]
    UnknownEffect(String),

    /// Seek on a source that cannot seek, or past its end
    #[error("Seek error: {0}")]
    Seek(String),

    /// Operation on a component that has been shut down
    #[error("Engine has been disposed")]
    Disposed,

    /// Configuration errors
    #[error(transparent)]
    Config(#[from] showdeck_common::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type using showdeck-audio Error
pub type Result<T> = std::result::Result<T, Error>;
