//! Background music: one loop-capable bed with its own volume

use crate::audio::gain::{Gain, GainSource};
use crate::audio::loader::SourceLoader;
use crate::audio::looping::LoopSource;
use crate::error::Result;
use crate::playback::mixer::{SampleMixer, SourceId};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

struct NowPlaying {
    source_id: SourceId,
    path: PathBuf,
    loop_flag: Arc<AtomicBool>,
    /// Ramp gain for timed fade-outs; fresh per track
    fade: Gain,
}

/// Music channel
///
/// Holds at most one track. Starting a new track stops the old one first.
pub struct MusicChannel {
    mixer: Arc<SampleMixer>,
    loader: Arc<dyn SourceLoader>,
    volume: Gain,
    fade_steps: u32,
    now_playing: Mutex<Option<NowPlaying>>,

    /// Bumped by every play/stop; an in-flight fade gives up when it changes
    generation: AtomicU64,
}

impl MusicChannel {
    pub fn new(mixer: Arc<SampleMixer>, loader: Arc<dyn SourceLoader>, fade_steps: u32) -> Self {
        Self {
            mixer,
            loader,
            volume: Gain::default(),
            fade_steps: fade_steps.max(1),
            now_playing: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Replace whatever is playing with `path`
    ///
    /// Looping wraps to the start on end-of-stream when the decoded source
    /// can seek; a non-looping track is released by the mixer when it ends.
    pub fn play_music(&self, path: &Path, looped: bool) -> Result<()> {
        let source = self.loader.load(path, self.mixer.format())?;

        let fade = Gain::default();
        let looping = LoopSource::new(source, looped);
        let loop_flag = looping.loop_flag();
        let chain = GainSource::new(GainSource::new(looping, self.volume.clone()), fade.clone());

        // Old track out and new track in under one guard
        let mut now_playing = self.lock();
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(previous) = now_playing.take() {
            self.release(previous);
        }
        let source_id = self.mixer.add_source(Box::new(chain))?;
        info!("Music started: {} (loop={})", path.display(), looped);
        *now_playing = Some(NowPlaying {
            source_id,
            path: path.to_path_buf(),
            loop_flag,
            fade,
        });
        Ok(())
    }

    /// Stop and release the current track, if any
    pub fn stop_music(&self) {
        let mut now_playing = self.lock();
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(playing) = now_playing.take() {
            self.release(playing);
        }
    }

    fn release(&self, playing: NowPlaying) {
        if self.mixer.remove_source(playing.source_id).is_some() {
            debug!("Music stopped: {}", playing.path.display());
        }
    }

    /// Step the volume down to silence over `duration`, then stop
    ///
    /// The channel volume is untouched, so the next track plays at the
    /// level set before the fade. Starting or stopping music while the fade
    /// runs cancels it.
    pub async fn fade_out(&self, duration: Duration) {
        let generation = self.generation.load(Ordering::SeqCst);
        let Some(fade) = self.lock().as_ref().map(|playing| playing.fade.clone()) else {
            return;
        };

        let steps = self.fade_steps;
        let step = duration / steps;
        debug!("Music fade-out over {:?} in {} steps", duration, steps);

        for i in 1..=steps {
            tokio::time::sleep(step).await;
            if self.generation.load(Ordering::SeqCst) != generation {
                debug!("Music fade-out cancelled");
                return;
            }
            fade.set(1.0 - i as f32 / steps as f32);
        }

        let mut now_playing = self.lock();
        if self.generation.load(Ordering::SeqCst) == generation {
            self.generation.fetch_add(1, Ordering::SeqCst);
            if let Some(playing) = now_playing.take() {
                self.release(playing);
            }
        }
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume.set(volume);
    }

    pub fn volume(&self) -> f32 {
        self.volume.get()
    }

    /// Enable or disable looping of the current track without restarting it
    pub fn set_looping(&self, looping: bool) {
        if let Some(playing) = self.lock().as_ref() {
            playing.loop_flag.store(looping, Ordering::Relaxed);
        }
    }

    /// True while the current track is still registered with the mixer
    pub fn is_playing(&self) -> bool {
        match self.lock().as_ref() {
            Some(playing) => self.mixer.contains(playing.source_id),
            None => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<NowPlaying>> {
        self.now_playing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
