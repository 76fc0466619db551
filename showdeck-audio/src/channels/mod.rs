//! Host-facing playback channels, each with its own volume

pub mod effects;
pub mod music;

pub use effects::EffectsChannel;
pub use music::MusicChannel;
