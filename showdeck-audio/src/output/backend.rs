//! Output backend abstraction
//!
//! A backend is one way of talking to audio hardware. The manager only
//! knows two of them, by tier: a low-latency primary and a broader
//! compatibility fallback.

use crate::audio::gain::Gain;
use crate::error::Result;
use crate::playback::mixer::SampleMixer;
use serde::Serialize;
use showdeck_common::events::OutputTier;
use std::sync::Arc;

/// Display name of the synthetic "follow the OS default" entry
pub const SYSTEM_DEFAULT_NAME: &str = "System Default";

/// An enumerated output device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    /// Opaque identifier (None = system default)
    pub id: Option<String>,
    pub name: String,
    pub is_default: bool,
}

impl DeviceInfo {
    pub fn system_default() -> Self {
        Self {
            id: None,
            name: SYSTEM_DEFAULT_NAME.to_string(),
            is_default: false,
        }
    }

    pub fn is_system_default(&self) -> bool {
        self.id.is_none()
    }
}

/// A live stream pulling from the mixer
///
/// Dropping the stream closes it.
pub trait OutputStream: Send {
    fn play(&mut self) -> Result<()>;

    fn pause(&mut self) -> Result<()>;

    /// Whether the backend reports the stream as actively playing
    fn is_playing(&self) -> bool;

    fn device_name(&self) -> String;
}

/// A way of opening output streams
pub trait OutputBackend: Send + Sync {
    fn tier(&self) -> OutputTier;

    /// Short backend name for logs and sessions
    fn name(&self) -> &str;

    /// Enumerate devices fresh (never cached)
    fn list_devices(&self) -> Result<Vec<DeviceInfo>>;

    /// Id of the operating system's current default device
    fn default_device_id(&self) -> Option<String>;

    /// Open a stream on `device` (None = system default) reading `mixer`
    ///
    /// The stream is created paused. `master` is applied in the callback.
    ///
    /// # Errors
    /// `DeviceNotFound` when the id no longer enumerates; `AudioOutput`
    /// for any other backend failure.
    fn open(
        &self,
        device: Option<&str>,
        mixer: Arc<SampleMixer>,
        master: Gain,
    ) -> Result<Box<dyn OutputStream>>;

    /// True when `device` currently enumerates on this backend
    fn has_device(&self, device: &str) -> bool {
        self.list_devices()
            .map(|devices| devices.iter().any(|d| d.id.as_deref() == Some(device)))
            .unwrap_or(false)
    }
}
