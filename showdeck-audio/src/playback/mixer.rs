//! Sample mixer: many independently-owned sources → one continuous stream
//!
//! # Architecture
//!
//! - Owners (channels, the cue queue) register sources and keep the returned
//!   [`SourceId`] to remove them later
//! - The output backend pulls [`SampleMixer::read`] from its audio thread
//! - Every read records a monotonic sample counter and a wall-clock stamp.
//!   These are the only signal the output manager and health monitor use to
//!   decide whether a device is really consuming audio; the mixer itself has
//!   no notion of "healthy"
//!
//! The mixer never blocks on anything but its own source-list lock, never
//! fails, and returns silence when it has no inputs.

use crate::audio::types::{SampleFormat, SampleSource};
use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

/// Handle for a registered mixer input
pub type SourceId = u64;

/// Called (on the audio thread) after an exhausted input was removed
///
/// Must be cheap and non-blocking: send on a channel, flip an atomic.
pub type FinishedHook = Box<dyn FnOnce(SourceId) + Send>;

/// Scratch size in samples; larger reads are processed in chunks
const SCRATCH_SAMPLES: usize = 8192;

/// A registered input
struct MixInput {
    id: SourceId,
    source: Box<dyn SampleSource>,
    /// Persistent inputs stay registered when they return no samples
    persistent: bool,
    on_finished: Option<FinishedHook>,
}

struct MixerInner {
    inputs: Vec<MixInput>,
    scratch: Vec<f32>,
}

/// Mixes registered sources with equal-power summing normalization
pub struct SampleMixer {
    format: SampleFormat,
    inner: Mutex<MixerInner>,
    next_id: AtomicU64,
    disposed: AtomicBool,

    /// Reference point for `last_read_nanos`
    epoch: Instant,

    /// Running count of samples delivered to the backend
    last_read_position: AtomicU64,

    /// Nanoseconds since `epoch` of the most recent read (0 = never read)
    last_read_nanos: AtomicU64,
}

impl SampleMixer {
    pub fn new(format: SampleFormat) -> Self {
        Self {
            format,
            inner: Mutex::new(MixerInner {
                inputs: Vec::new(),
                scratch: vec![0.0; SCRATCH_SAMPLES],
            }),
            next_id: AtomicU64::new(1),
            disposed: AtomicBool::new(false),
            epoch: Instant::now(),
            last_read_position: AtomicU64::new(0),
            last_read_nanos: AtomicU64::new(0),
        }
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    /// Register a source that is removed automatically once exhausted
    pub fn add_source(&self, source: Box<dyn SampleSource>) -> Result<SourceId> {
        self.register(source, false, None)
    }

    /// Register a source that stays registered when it returns no samples
    ///
    /// Used for inputs with a valid idle state, such as the cue queue.
    pub fn add_persistent_source(&self, source: Box<dyn SampleSource>) -> Result<SourceId> {
        self.register(source, true, None)
    }

    /// Register an auto-removed source with a completion hook
    pub fn add_source_with_hook(
        &self,
        source: Box<dyn SampleSource>,
        on_finished: FinishedHook,
    ) -> Result<SourceId> {
        self.register(source, false, Some(on_finished))
    }

    fn register(
        &self,
        source: Box<dyn SampleSource>,
        persistent: bool,
        on_finished: Option<FinishedHook>,
    ) -> Result<SourceId> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(Error::Disposed);
        }
        if source.format() != self.format {
            return Err(Error::FormatMismatch {
                expected: self.format.to_string(),
                actual: source.format().to_string(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.lock();
        inner.inputs.push(MixInput {
            id,
            source,
            persistent,
            on_finished,
        });
        debug!("Mixer input {} added ({} active)", id, inner.inputs.len());
        Ok(id)
    }

    /// Remove an input, handing it back to the caller
    ///
    /// Returns None when the id is unknown (already finished or removed).
    /// The completion hook is not called for explicit removals.
    pub fn remove_source(&self, id: SourceId) -> Option<Box<dyn SampleSource>> {
        let mut inner = self.lock();
        let index = inner.inputs.iter().position(|input| input.id == id)?;
        let input = inner.inputs.swap_remove(index);
        debug!("Mixer input {} removed ({} active)", id, inner.inputs.len());
        Some(input.source)
    }

    /// Remove several inputs at once under a single lock
    pub fn remove_sources(&self, ids: &[SourceId]) -> Vec<Box<dyn SampleSource>> {
        let mut inner = self.lock();
        let mut removed = Vec::with_capacity(ids.len());
        let mut i = 0;
        while i < inner.inputs.len() {
            if ids.contains(&inner.inputs[i].id) {
                removed.push(inner.inputs.swap_remove(i).source);
            } else {
                i += 1;
            }
        }
        removed
    }

    pub fn contains(&self, id: SourceId) -> bool {
        self.lock().inputs.iter().any(|input| input.id == id)
    }

    pub fn source_count(&self) -> usize {
        self.lock().inputs.len()
    }

    /// Drop every input
    pub fn clear(&self) {
        let drained: Vec<MixInput> = self.lock().inputs.drain(..).collect();
        debug!("Mixer cleared ({} inputs released)", drained.len());
    }

    /// Release all inputs and refuse new ones; reads keep returning silence
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.clear();
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Fill `buf` with the mix of every registered input
    ///
    /// Always fills the whole buffer (silence where nothing plays) and
    /// returns `buf.len()`.
    pub fn read(&self, buf: &mut [f32]) -> usize {
        buf.fill(0.0);

        {
            let mut guard = self.lock();
            let inner = &mut *guard;

            for out_chunk in buf.chunks_mut(SCRATCH_SAMPLES) {
                Self::mix_chunk(&mut inner.inputs, &mut inner.scratch, out_chunk);
            }
        }

        self.last_read_position
            .fetch_add(buf.len() as u64, Ordering::Relaxed);
        let now = self.epoch.elapsed().as_nanos().max(1) as u64;
        self.last_read_nanos.store(now, Ordering::Relaxed);

        buf.len()
    }

    fn mix_chunk(inputs: &mut Vec<MixInput>, scratch: &mut [f32], out: &mut [f32]) {
        let len = out.len();
        let scratch = &mut scratch[..len];
        let mut active = 0usize;

        let mut i = 0;
        while i < inputs.len() {
            let n = inputs[i].source.read(scratch);
            if n > 0 {
                active += 1;
                for (o, s) in out[..n].iter_mut().zip(scratch[..n].iter()) {
                    *o += *s;
                }
            }

            if n < len && !inputs[i].persistent {
                // Exhausted: the element swapped into `i` has not been read yet
                let finished = inputs.swap_remove(i);
                if let Some(hook) = finished.on_finished {
                    hook(finished.id);
                }
                continue;
            }
            i += 1;
        }

        if active > 1 {
            let norm = 1.0 / (active as f32).sqrt();
            for sample in out.iter_mut() {
                *sample *= norm;
            }
        }
    }

    /// Monotonic count of samples read so far
    pub fn last_read_position(&self) -> u64 {
        self.last_read_position.load(Ordering::Relaxed)
    }

    /// Wall-clock time of the most recent read (None = never read)
    pub fn last_read_time(&self) -> Option<Instant> {
        match self.last_read_nanos.load(Ordering::Relaxed) {
            0 => None,
            nanos => Some(self.epoch + Duration::from_nanos(nanos)),
        }
    }

    /// Time since the most recent read, or since creation if never read
    pub fn time_since_last_read(&self) -> Duration {
        let last = Duration::from_nanos(self.last_read_nanos.load(Ordering::Relaxed));
        self.epoch.elapsed().saturating_sub(last)
    }

    /// The audio thread must not panic because another thread did
    fn lock(&self) -> MutexGuard<'_, MixerInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for SampleMixer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleMixer")
            .field("format", &self.format)
            .field("last_read_position", &self.last_read_position())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// The mixer as a source: infinite, never seeks
impl SampleSource for SampleMixer {
    fn format(&self) -> SampleFormat {
        SampleMixer::format(self)
    }

    fn read(&mut self, buf: &mut [f32]) -> usize {
        SampleMixer::read(self, buf)
    }

    fn position(&self) -> u64 {
        self.last_read_position()
    }

    fn length(&self) -> Option<u64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::types::BufferSource;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn format() -> SampleFormat {
        SampleFormat::stereo_44k()
    }

    fn constant(value: f32, samples: usize) -> Box<dyn SampleSource> {
        Box::new(BufferSource::new(vec![value; samples], format()))
    }

    #[test]
    fn test_zero_inputs_returns_silence() {
        let mixer = SampleMixer::new(format());
        let mut buf = [1.0f32; 64];

        assert_eq!(mixer.read(&mut buf), 64);
        assert!(buf.iter().all(|s| *s == 0.0));
        assert_eq!(mixer.last_read_position(), 64);
    }

    #[test]
    fn test_single_source_passes_through() {
        let mixer = SampleMixer::new(format());
        mixer.add_source(constant(0.5, 128)).unwrap();

        let mut buf = [0.0f32; 64];
        mixer.read(&mut buf);
        assert!(buf.iter().all(|s| *s == 0.5));
    }

    #[test]
    fn test_two_sources_normalized_by_sqrt_count() {
        let mixer = SampleMixer::new(format());
        mixer.add_source(constant(0.5, 128)).unwrap();
        mixer.add_source(constant(0.5, 128)).unwrap();

        let mut buf = [0.0f32; 64];
        mixer.read(&mut buf);
        let expected = 1.0 / 2f32.sqrt();
        assert!(buf.iter().all(|s| (*s - expected).abs() < 1e-6));
    }

    #[test]
    fn test_exhausted_source_removed_and_hook_fired() {
        let mixer = SampleMixer::new(format());
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);

        let id = mixer
            .add_source_with_hook(
                constant(0.25, 10),
                Box::new(move |_| {
                    fired_clone.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        let mut buf = [0.0f32; 16];
        mixer.read(&mut buf);

        assert_eq!(&buf[..10], &[0.25; 10]);
        assert_eq!(&buf[10..], &[0.0; 6]);
        assert!(!mixer.contains(id));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_persistent_source_survives_idle() {
        let mixer = SampleMixer::new(format());
        let id = mixer.add_persistent_source(constant(0.0, 0)).unwrap();

        let mut buf = [0.0f32; 16];
        mixer.read(&mut buf);
        mixer.read(&mut buf);
        assert!(mixer.contains(id));
    }

    #[test]
    fn test_remove_source_returns_it() {
        let mixer = SampleMixer::new(format());
        let id = mixer.add_source(constant(0.1, 100)).unwrap();

        let removed = mixer.remove_source(id).unwrap();
        assert_eq!(removed.length(), Some(100));
        assert!(mixer.remove_source(id).is_none());
        assert_eq!(mixer.source_count(), 0);
    }

    #[test]
    fn test_rejects_wrong_format() {
        let mixer = SampleMixer::new(format());
        let mono = Box::new(BufferSource::new(vec![0.0; 4], SampleFormat::new(44100, 1)));
        assert!(matches!(
            mixer.add_source(mono),
            Err(Error::FormatMismatch { .. })
        ));
    }

    #[test]
    fn test_large_read_processed_in_chunks() {
        let mixer = SampleMixer::new(format());
        mixer.add_source(constant(0.5, SCRATCH_SAMPLES * 3)).unwrap();

        let mut buf = vec![0.0f32; SCRATCH_SAMPLES * 2 + 10];
        assert_eq!(mixer.read(&mut buf), buf.len());
        assert!(buf.iter().all(|s| *s == 0.5));
    }

    #[test]
    fn test_read_tracking() {
        let mixer = SampleMixer::new(format());
        assert!(mixer.last_read_time().is_none());

        let mut buf = [0.0f32; 32];
        mixer.read(&mut buf);
        mixer.read(&mut buf);

        assert_eq!(mixer.last_read_position(), 64);
        assert!(mixer.last_read_time().is_some());
        assert!(mixer.time_since_last_read() < Duration::from_secs(1));
    }

    #[test]
    fn test_mixer_is_an_infinite_source() {
        let mut mixer = SampleMixer::new(format());
        assert_eq!(SampleSource::length(&mixer), None);
        assert!(!mixer.can_seek());

        let mut buf = [0.0f32; 16];
        assert_eq!(SampleSource::read(&mut mixer, &mut buf), 16);
        assert_eq!(mixer.position(), 16);
    }

    #[test]
    fn test_dispose_releases_and_refuses() {
        let mixer = SampleMixer::new(format());
        mixer.add_source(constant(0.5, 100)).unwrap();
        mixer.dispose();

        assert_eq!(mixer.source_count(), 0);
        assert!(matches!(mixer.add_source(constant(0.5, 1)), Err(Error::Disposed)));

        let mut buf = [1.0f32; 8];
        assert_eq!(mixer.read(&mut buf), 8);
        assert!(buf.iter().all(|s| *s == 0.0));
    }
}
