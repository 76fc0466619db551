//! Mixing graph: sample mixer, cue queue, and silence gating

pub mod cue_queue;
pub mod mixer;
pub mod silence_gate;

pub use cue_queue::{Cue, CueInfo, CueQueue, CueQueueSource};
pub use mixer::{SampleMixer, SourceId};
pub use silence_gate::SilenceGate;
