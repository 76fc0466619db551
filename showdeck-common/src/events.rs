//! Event types for the ShowDeck audio engine
//!
//! # Architecture
//!
//! - **EventBus** (tokio::broadcast): one-to-many, lossy, never blocks the sender
//! - Receivers run on their own tasks, so anything emitted from the audio
//!   path is consumed off that thread
//!
//! Events carry only diagnostics. Nothing in the engine depends on a
//! subscriber being present.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Timestamp type used by all events
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Which output backend a session runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputTier {
    /// Low-latency backend, tried first
    Primary,
    /// Higher-latency backend with broader hardware support
    Compatibility,
}

impl std::fmt::Display for OutputTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputTier::Primary => write!(f, "primary"),
            OutputTier::Compatibility => write!(f, "compatibility"),
        }
    }
}

/// Cue priority class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CuePriority {
    /// Waits in FIFO order behind current/next
    Normal,
    /// Pre-empts whatever would play next and starts a crossfade at once
    Immediate,
}

/// Engine event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    /// A cue became the current cue
    CueStarted {
        cue_id: u64,
        label: String,
        timestamp: Timestamp,
    },

    /// A crossfade between two cues began
    CrossfadeStarted {
        outgoing_id: u64,
        incoming_id: u64,
        /// Crossfade length in interleaved samples (after clamping)
        length_samples: u64,
        timestamp: Timestamp,
    },

    /// A cue was fully consumed or superseded and has been released
    CueFinished {
        cue_id: u64,
        label: String,
        timestamp: Timestamp,
    },

    /// A cue was refused at enqueue time
    CueRejected {
        label: String,
        reason: String,
        timestamp: Timestamp,
    },

    /// A silence gate confirmed sustained near-silence and began fading
    SilenceDetected {
        label: String,
        /// Source position (samples) at which the fade starts
        position: u64,
        timestamp: Timestamp,
    },

    /// An output session was established and verified
    OutputSelected {
        tier: OutputTier,
        device: String,
        timestamp: Timestamp,
    },

    /// Every tier failed; no output session is active
    OutputLost {
        reason: String,
        timestamp: Timestamp,
    },

    /// The health monitor found the mixer unread while the backend is not playing
    StallDetected {
        tier: OutputTier,
        device: String,
        idle_ms: u64,
        timestamp: Timestamp,
    },

    /// The operating system's default output device changed
    DefaultDeviceChanged {
        previous: Option<String>,
        current: Option<String>,
        timestamp: Timestamp,
    },

    /// A one-shot effect finished playing and was released
    EffectFinished {
        effect_id: String,
        timestamp: Timestamp,
    },
}

/// Central event distribution bus
///
/// Thin wrapper over `tokio::sync::broadcast`. Sending never waits for
/// receivers; slow receivers lose the oldest events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before dropping old events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
