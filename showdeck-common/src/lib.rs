//! # ShowDeck Common Library
//!
//! Shared, hardware-free code for the ShowDeck audio crates:
//! - Error type
//! - Engine configuration model and TOML loader
//! - Fade curve definitions (equal-power crossfade law)
//! - Engine event types and the event bus

pub mod config;
pub mod error;
pub mod events;
pub mod fade_curves;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use events::{CuePriority, EngineEvent, EventBus, OutputTier};
pub use fade_curves::FadeCurve;
