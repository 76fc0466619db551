//! # ShowDeck Audio Engine (showdeck-audio)
//!
//! Playback engine for the host console: a cue queue with equal-power
//! crossfades, a looping music bed, fire-and-forget effects, and an output
//! layer that verifies samples are actually flowing before trusting a
//! device.
//!
//! **Architecture:** symphonia decode + rubato resample into a single
//! float mixer, pulled by a cpal stream
//!
//! - [`audio`]: sources, decoding, format conversion
//! - [`playback`]: mixer, silence gate, cue queue
//! - [`channels`]: music and effects
//! - [`output`]: backends, verified selection, health monitoring
//! - [`engine`]: the facade that wires it all together

pub mod audio;
pub mod channels;
pub mod engine;
pub mod error;
pub mod output;
pub mod playback;

pub use engine::AudioEngine;
pub use error::{Error, Result};
pub use output::{DeviceInfo, OutputSession};
pub use showdeck_common::{CuePriority, EngineConfig, EngineEvent, OutputTier};
