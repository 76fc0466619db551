//! Audio sources, decoding, and format conversion

pub mod decoder;
pub mod gain;
pub mod loader;
pub mod looping;
pub mod resampler;
pub mod types;

pub use gain::{Gain, GainSource};
pub use loader::{SourceLoader, SymphoniaLoader};
pub use looping::LoopSource;
pub use types::{BufferSource, SampleFormat, SampleSource};
