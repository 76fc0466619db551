//! Engine facade
//!
//! Wires the mixing graph to the output layer:
//!
//! ```text
//! MusicChannel ─┐
//! EffectsChannel ┼─> SampleMixer ──> OutputManager ──> device
//! CueQueue ─────┘                        ^
//!                                  HealthMonitor
//! ```
//!
//! Everything is configured once, from one immutable [`EngineConfig`].

use crate::audio::loader::{SourceLoader, SymphoniaLoader};
use crate::audio::types::SampleFormat;
use crate::channels::{EffectsChannel, MusicChannel};
use crate::error::{Error, Result};
use crate::output::{CpalBackend, DeviceInfo, HealthMonitor, OutputBackend, OutputManager, OutputSession};
use crate::playback::{CueQueue, SampleMixer, SourceId};
use showdeck_common::events::{CuePriority, EngineEvent, EventBus};
use showdeck_common::EngineConfig;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

/// Event bus capacity; receivers that fall further behind lose events
const EVENT_CAPACITY: usize = 256;

/// The audio engine
pub struct AudioEngine {
    config: EngineConfig,
    events: EventBus,
    mixer: Arc<SampleMixer>,
    cue_queue: Arc<CueQueue>,
    cue_source_id: SourceId,
    music: Arc<MusicChannel>,
    effects: Arc<EffectsChannel>,
    output: Arc<OutputManager>,
    health: Arc<HealthMonitor>,
    disposed: AtomicBool,
}

impl AudioEngine {
    /// Build the engine with explicit decoder and backends
    ///
    /// Must be called inside a tokio runtime. No device is opened until
    /// [`initialize`](Self::initialize).
    pub fn new(
        config: EngineConfig,
        loader: Arc<dyn SourceLoader>,
        primary: Arc<dyn OutputBackend>,
        compatibility: Arc<dyn OutputBackend>,
    ) -> Result<Self> {
        let config = config.validate()?;
        let format = SampleFormat::from(config.format);
        let events = EventBus::new(EVENT_CAPACITY);

        let mixer = Arc::new(SampleMixer::new(format));

        let cue_queue = Arc::new(CueQueue::new(
            format,
            config.queue,
            config.silence,
            Arc::clone(&loader),
            events.clone(),
        ));
        let cue_source_id = mixer.add_persistent_source(Box::new(cue_queue.source()))?;

        let music = Arc::new(MusicChannel::new(
            Arc::clone(&mixer),
            Arc::clone(&loader),
            config.music.fade_steps,
        ));
        let effects = Arc::new(EffectsChannel::new(
            Arc::clone(&mixer),
            Arc::clone(&loader),
            events.clone(),
        ));

        let output = Arc::new(OutputManager::new(
            Arc::clone(&mixer),
            primary,
            compatibility,
            config.verification,
            config.output.master_volume,
            events.clone(),
            config.debug,
        ));
        let health = Arc::new(HealthMonitor::new(
            Arc::clone(&output),
            config.health,
            events.clone(),
            config.debug,
        ));

        info!("Audio engine created ({})", format);

        Ok(Self {
            config,
            events,
            mixer,
            cue_queue,
            cue_source_id,
            music,
            effects,
            output,
            health,
            disposed: AtomicBool::new(false),
        })
    }

    /// Build the engine with the symphonia decoder and cpal backends
    pub fn with_default_backends(config: EngineConfig) -> Result<Self> {
        let primary = Arc::new(CpalBackend::primary(config.output.primary_buffer_frames));
        let compatibility = Arc::new(CpalBackend::compatibility(
            config.output.compatibility_buffer_frames,
        ));
        Self::new(config, Arc::new(SymphoniaLoader), primary, compatibility)
    }

    /// Establish output and start health monitoring
    ///
    /// `device` overrides the configured device; with neither, the system
    /// default is used. Verification runs on a blocking worker.
    ///
    /// # Errors
    /// `BackendExhausted` when no output tier verified.
    pub async fn initialize(&self, device: Option<String>) -> Result<OutputSession> {
        let device = device.or_else(|| self.config.output_device.clone());
        let output = Arc::clone(&self.output);
        let session = tokio::task::spawn_blocking(move || output.initialize(device.as_deref()))
            .await
            .map_err(|e| Error::AudioOutput(format!("Output initialization task failed: {}", e)))??;

        self.health.spawn();
        Ok(session)
    }

    /// Move output to another device without touching the mixer inputs
    pub async fn change_device(&self, device: Option<String>) -> Result<OutputSession> {
        let output = Arc::clone(&self.output);
        let session = tokio::task::spawn_blocking(move || output.change_device(device.as_deref()))
            .await
            .map_err(|e| Error::AudioOutput(format!("Device change task failed: {}", e)))??;

        self.health.spawn();
        Ok(session)
    }

    /// Enqueue a cue file; false when rejected
    pub fn queue_audio(&self, path: &Path, priority: CuePriority) -> bool {
        self.cue_queue.queue_audio(path, priority)
    }

    pub fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        self.output.list_devices()
    }

    pub fn set_master_volume(&self, volume: f32) {
        self.output.set_master_volume(volume);
    }

    pub fn is_playing(&self) -> bool {
        self.output.is_playing()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn mixer(&self) -> &Arc<SampleMixer> {
        &self.mixer
    }

    pub fn cue_queue(&self) -> &Arc<CueQueue> {
        &self.cue_queue
    }

    pub fn music(&self) -> &Arc<MusicChannel> {
        &self.music
    }

    pub fn effects(&self) -> &Arc<EffectsChannel> {
        &self.effects
    }

    pub fn output(&self) -> &Arc<OutputManager> {
        &self.output
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    /// Stop everything and release every source
    ///
    /// A background recovery still running sees the disposed flag and
    /// abandons. Safe to call more than once.
    pub fn shutdown(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Audio engine shutting down");

        self.health.stop();
        self.output.dispose();

        self.mixer.remove_source(self.cue_source_id);
        self.cue_queue.stop();
        self.music.stop_music();
        self.effects.stop_all_effects();
        self.mixer.dispose();

        info!("Audio engine shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
