//! One-shot sound effects
//!
//! Any number of effects may play at once, each keyed by an id. Finished
//! effects are reported by the mixer's completion hook over a channel and
//! removed from the map by a background task, never on the audio thread.

use crate::audio::gain::{Gain, GainSource};
use crate::audio::loader::SourceLoader;
use crate::error::{Error, Result};
use crate::playback::mixer::{SampleMixer, SourceId};
use showdeck_common::events::{EngineEvent, EventBus};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

type ActiveEffects = Arc<Mutex<HashMap<String, SourceId>>>;

/// Effects channel
///
/// Must be created inside a tokio runtime (it spawns its cleanup task).
pub struct EffectsChannel {
    mixer: Arc<SampleMixer>,
    loader: Arc<dyn SourceLoader>,
    volume: Gain,
    active: ActiveEffects,
    finished_tx: mpsc::UnboundedSender<(String, SourceId)>,
}

impl EffectsChannel {
    pub fn new(mixer: Arc<SampleMixer>, loader: Arc<dyn SourceLoader>, events: EventBus) -> Self {
        let active: ActiveEffects = Arc::new(Mutex::new(HashMap::new()));
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();

        tokio::spawn(cleanup_task(finished_rx, Arc::clone(&active), events));

        Self {
            mixer,
            loader,
            volume: Gain::default(),
            active,
            finished_tx,
        }
    }

    /// Start a one-shot effect, returning its id
    ///
    /// Uses `id` when given (replacing an effect already playing under that
    /// id), otherwise generates one.
    pub fn play_effect(&self, path: &Path, id: Option<&str>) -> Result<String> {
        let source = self.loader.load(path, self.mixer.format())?;
        let id = id.map(str::to_string).unwrap_or_else(|| Uuid::new_v4().to_string());

        let chain = GainSource::new(source, self.volume.clone());
        let tx = self.finished_tx.clone();
        let hook_id = id.clone();

        // Registration happens under the map lock so a very short effect
        // cannot finish before it is recorded
        let mut active = lock(&self.active);
        if let Some(previous) = active.remove(&id) {
            self.mixer.remove_source(previous);
        }
        let source_id = self.mixer.add_source_with_hook(
            Box::new(chain),
            Box::new(move |source_id| {
                let _ = tx.send((hook_id, source_id));
            }),
        )?;
        active.insert(id.clone(), source_id);

        debug!("Effect {} started: {}", id, path.display());
        Ok(id)
    }

    pub fn stop_effect(&self, id: &str) -> Result<()> {
        let source_id = lock(&self.active)
            .remove(id)
            .ok_or_else(|| Error::UnknownEffect(id.to_string()))?;
        self.mixer.remove_source(source_id);
        debug!("Effect {} stopped", id);
        Ok(())
    }

    /// Detach every effect; the sources are released off the caller's thread
    pub fn stop_all_effects(&self) {
        let ids: Vec<SourceId> = lock(&self.active).drain().map(|(_, id)| id).collect();
        if ids.is_empty() {
            return;
        }

        let removed = self.mixer.remove_sources(&ids);
        info!("Stopping {} effects", removed.len());
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || drop(removed));
            }
            Err(_) => drop(removed),
        }
    }

    pub fn is_effect_playing(&self, id: &str) -> bool {
        lock(&self.active).contains_key(id)
    }

    pub fn active_count(&self) -> usize {
        lock(&self.active).len()
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume.set(volume);
    }

    pub fn volume(&self) -> f32 {
        self.volume.get()
    }
}

/// Forget finished effects, unless the id was reused in the meantime
async fn cleanup_task(
    mut finished_rx: mpsc::UnboundedReceiver<(String, SourceId)>,
    active: ActiveEffects,
    events: EventBus,
) {
    while let Some((id, source_id)) = finished_rx.recv().await {
        let removed = {
            let mut active = lock(&active);
            if active.get(&id) == Some(&source_id) {
                active.remove(&id);
                true
            } else {
                false
            }
        };

        if removed {
            debug!("Effect {} finished", id);
            events.emit_lossy(EngineEvent::EffectFinished {
                effect_id: id,
                timestamp: chrono::Utc::now(),
            });
        }
    }
    debug!("Effects cleanup task exiting");
}

fn lock(active: &ActiveEffects) -> MutexGuard<'_, HashMap<String, SourceId>> {
    active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
