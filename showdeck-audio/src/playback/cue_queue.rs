//! Crossfading cue queue
//!
//! Holds at most one current cue, at most one staged next cue, and a
//! bounded FIFO of normal-priority cues waiting behind them. The queue is
//! registered with the mixer as a single persistent input
//! ([`CueQueueSource`]); an empty queue reads as silence.
//!
//! # Crossfading
//!
//! When the current cue's remaining length drops into the crossfade window
//! and a next cue is staged, both are read for the same buffer and mixed
//! with the configured curve (equal-power by default: outgoing gain
//! `sqrt(1 - p)`, incoming gain `sqrt(p)`). The window is clamped to what
//! is left of the outgoing cue.
//!
//! An immediate-priority cue becomes the staged next cue and forces the
//! crossfade to start on the next read. Whatever was staged goes back to
//! the front of the FIFO, so it is deferred, never skipped. If a crossfade
//! is already running, both of its cues fade out together from the gains
//! they had reached while the immediate cue fades in.

use crate::audio::loader::SourceLoader;
use crate::audio::types::{SampleFormat, SampleSource};
use crate::error::{Error, Result};
use crate::playback::silence_gate::SilenceGate;
use showdeck_common::config::{QueueConfig, SilenceConfig};
use showdeck_common::events::{CuePriority, EngineEvent, EventBus};
use showdeck_common::fade_curves::FadeCurve;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Scratch for the incoming cue during a crossfade
const CROSSFADE_SCRATCH: usize = 8192;

/// A decoded, format-converted source plus its queue metadata
pub struct Cue {
    pub id: u64,
    /// File name, for diagnostics
    pub label: String,
    pub priority: CuePriority,
    source: Box<dyn SampleSource>,
}

impl std::fmt::Debug for Cue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cue")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Snapshot of a held cue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CueInfo {
    pub id: u64,
    pub label: String,
    pub priority: CuePriority,
}

impl From<&Cue> for CueInfo {
    fn from(cue: &Cue) -> Self {
        Self {
            id: cue.id,
            label: cue.label.clone(),
            priority: cue.priority,
        }
    }
}

/// A cue from an interrupted crossfade, still fading out
struct Tail {
    cue: Cue,
    /// Gain it had reached when the crossfade was interrupted
    scale: f32,
}

struct Crossfade {
    incoming: Cue,
    /// Window in frames, after clamping
    length: u64,
    /// Frames already mixed
    done: u64,
}

/// Everything the audio thread touches, behind one lock
struct QueueState {
    current: Option<Cue>,
    next: Option<Cue>,
    pending: VecDeque<Cue>,
    crossfade: Option<Crossfade>,
    tails: Vec<Tail>,
    /// Gain the current cue carries over from an interrupted crossfade
    outgoing_scale: f32,

    /// Set by an immediate cue; begins the crossfade on the next read
    force_crossfade: bool,

    format: SampleFormat,
    curve: FadeCurve,
    window_frames: u64,
    events: EventBus,
    scratch: Vec<f32>,
    samples_delivered: u64,
}

impl QueueState {
    fn channels(&self) -> usize {
        self.format.channels.max(1) as usize
    }

    /// Make sure there is a current cue and, behind it, a staged next cue
    fn promote(&mut self) {
        if self.current.is_none() && self.crossfade.is_none() {
            if let Some(cue) = self.next.take().or_else(|| self.pending.pop_front()) {
                self.start(cue);
            }
        }
        if self.current.is_some() && self.next.is_none() && self.crossfade.is_none() {
            self.next = self.pending.pop_front();
        }
    }

    fn start(&mut self, cue: Cue) {
        self.events.emit_lossy(EngineEvent::CueStarted {
            cue_id: cue.id,
            label: cue.label.clone(),
            timestamp: chrono::Utc::now(),
        });
        self.current = Some(cue);
    }

    fn finish(&self, cue: Cue) {
        self.events.emit_lossy(EngineEvent::CueFinished {
            cue_id: cue.id,
            label: cue.label,
            timestamp: chrono::Utc::now(),
        });
    }

    fn window_samples(&self) -> u64 {
        self.window_frames * self.channels() as u64
    }

    fn should_crossfade(&self) -> bool {
        if self.next.is_none() {
            return false;
        }
        if self.force_crossfade {
            return true;
        }
        match self.current.as_ref().and_then(|cue| cue.source.remaining()) {
            Some(remaining) => remaining <= self.window_samples(),
            None => false,
        }
    }

    fn begin_crossfade(&mut self) {
        self.force_crossfade = false;
        let Some(incoming) = self.next.take() else {
            return;
        };
        let Some(outgoing) = self.current.as_ref() else {
            self.retire_tails();
            self.start(incoming);
            return;
        };

        let channels = self.channels() as u64;
        let length = match outgoing.source.remaining() {
            Some(remaining) => self.window_frames.min(remaining / channels),
            None => self.window_frames,
        };

        self.events.emit_lossy(EngineEvent::CrossfadeStarted {
            outgoing_id: outgoing.id,
            incoming_id: incoming.id,
            length_samples: length * channels,
            timestamp: chrono::Utc::now(),
        });
        self.crossfade = Some(Crossfade {
            incoming,
            length,
            done: 0,
        });
    }

    /// Promote the incoming cue and release the outgoing ones
    fn complete_crossfade(&mut self) {
        if let Some(xf) = self.crossfade.take() {
            if let Some(outgoing) = self.current.take() {
                self.finish(outgoing);
            }
            self.retire_tails();
            self.outgoing_scale = 1.0;
            self.start(xf.incoming);
        }
    }

    fn retire_tails(&mut self) {
        for tail in std::mem::take(&mut self.tails) {
            self.finish(tail.cue);
        }
    }

    fn read(&mut self, buf: &mut [f32]) -> usize {
        let channels = self.channels();
        let mut filled = 0;

        while buf.len() - filled >= channels {
            if self.crossfade.is_some() {
                filled += self.read_crossfade(&mut buf[filled..]);
                continue;
            }

            self.promote();
            if self.current.is_none() {
                break;
            }
            if self.should_crossfade() {
                self.begin_crossfade();
                continue;
            }

            // Stop exactly at the start of the crossfade window
            let mut want = buf.len() - filled;
            let window = self.window_samples();
            let staged = self.next.is_some();
            let Some(current) = self.current.as_mut() else {
                break;
            };
            if staged {
                if let Some(remaining) = current.source.remaining() {
                    want = want.min((remaining - window) as usize);
                }
            }

            let n = current.source.read(&mut buf[filled..filled + want]);
            if n == 0 {
                if let Some(done) = self.current.take() {
                    self.finish(done);
                }
                continue;
            }
            filled += n;
        }

        self.samples_delivered += filled as u64;
        filled
    }

    /// Mix outgoing and incoming for one chunk; short reads are zero-padded
    fn read_crossfade(&mut self, out: &mut [f32]) -> usize {
        let channels = self.channels();
        let curve = self.curve;
        let outgoing_scale = self.outgoing_scale;
        let Some(xf) = self.crossfade.as_mut() else {
            return 0;
        };

        let frames_left = (xf.length - xf.done) as usize;
        let max = out.len().min(self.scratch.len());
        let len = (max / channels).min(frames_left) * channels;
        if len == 0 {
            self.complete_crossfade();
            return 0;
        }

        let out = &mut out[..len];
        let n_out = match self.current.as_mut() {
            Some(cue) => cue.source.read(out),
            None => 0,
        };
        out[n_out..].fill(0.0);

        let incoming = &mut self.scratch[..len];
        let n_in = xf.incoming.source.read(incoming);
        incoming[n_in..].fill(0.0);

        let length = xf.length as f32;
        for (frame, (o, i)) in out
            .chunks_mut(channels)
            .zip(incoming.chunks(channels))
            .enumerate()
        {
            let p = (xf.done + frame as u64 + 1) as f32 / length;
            let (gain_out, gain_in) = curve.crossfade_gains(p);
            let gain_out = gain_out * outgoing_scale;
            for (o, i) in o.iter_mut().zip(i.iter()) {
                *o = *o * gain_out + *i * gain_in;
            }
        }

        for tail in self.tails.iter_mut() {
            let samples = &mut self.scratch[..len];
            let n = tail.cue.source.read(samples);
            samples[n..].fill(0.0);
            for (frame, (o, t)) in out
                .chunks_mut(channels)
                .zip(samples.chunks(channels))
                .enumerate()
            {
                let p = (xf.done + frame as u64 + 1) as f32 / length;
                let gain = curve.crossfade_gains(p).0 * tail.scale;
                for (o, t) in o.iter_mut().zip(t.iter()) {
                    *o += *t * gain;
                }
            }
        }
        xf.done += (len / channels) as u64;

        if xf.done >= xf.length {
            self.complete_crossfade();
        }
        len
    }

    /// Immediate cue: pre-empt whatever would play next
    fn interrupt(&mut self, cue: Cue) {
        // Freeze a running crossfade at its current gains; its incoming cue
        // becomes the new outgoing one and the old outgoing one keeps fading
        if let Some(xf) = self.crossfade.take() {
            let p = xf.done as f32 / xf.length.max(1) as f32;
            let (gain_out, gain_in) = self.curve.crossfade_gains(p);
            for tail in self.tails.iter_mut() {
                tail.scale *= gain_out;
            }
            if let Some(outgoing) = self.current.take() {
                self.tails.push(Tail {
                    cue: outgoing,
                    scale: self.outgoing_scale * gain_out,
                });
            }
            self.current = Some(xf.incoming);
            self.outgoing_scale = gain_in;
        }
        if self.current.is_none() {
            self.start(cue);
            return;
        }
        if let Some(staged) = self.next.take() {
            self.pending.push_front(staged);
        }
        self.next = Some(cue);
        self.force_crossfade = true;
    }

    /// Detach every held cue; the caller drops them outside the lock
    fn drain(&mut self) -> Vec<Cue> {
        let mut drained = Vec::with_capacity(self.pending.len() + 3);
        drained.extend(self.current.take());
        drained.extend(self.crossfade.take().map(|xf| xf.incoming));
        drained.extend(self.tails.drain(..).map(|tail| tail.cue));
        drained.extend(self.next.take());
        drained.extend(self.pending.drain(..));
        self.force_crossfade = false;
        self.outgoing_scale = 1.0;
        drained
    }

    fn held(&self) -> usize {
        self.current.is_some() as usize
            + self.crossfade.is_some() as usize
            + self.tails.len()
            + self.next.is_some() as usize
            + self.pending.len()
    }
}

/// Bounded, crossfading queue of cues
pub struct CueQueue {
    state: Arc<Mutex<QueueState>>,
    loader: Arc<dyn SourceLoader>,
    format: SampleFormat,
    limit: usize,
    trim_silence: bool,
    silence: SilenceConfig,
    events: EventBus,
    next_id: AtomicU64,
}

impl CueQueue {
    pub fn new(
        format: SampleFormat,
        queue: QueueConfig,
        silence: SilenceConfig,
        loader: Arc<dyn SourceLoader>,
        events: EventBus,
    ) -> Self {
        let window_frames = queue.crossfade_ms * format.sample_rate as u64 / 1000;
        let state = QueueState {
            current: None,
            next: None,
            pending: VecDeque::with_capacity(queue.limit),
            crossfade: None,
            tails: Vec::new(),
            outgoing_scale: 1.0,
            force_crossfade: false,
            format,
            curve: queue.crossfade_curve,
            window_frames,
            events: events.clone(),
            scratch: vec![0.0; CROSSFADE_SCRATCH],
            samples_delivered: 0,
        };

        Self {
            state: Arc::new(Mutex::new(state)),
            loader,
            format,
            limit: queue.limit,
            trim_silence: queue.trim_silence,
            silence,
            events,
            next_id: AtomicU64::new(1),
        }
    }

    /// The mixer-facing side of this queue
    pub fn source(&self) -> CueQueueSource {
        CueQueueSource {
            state: Arc::clone(&self.state),
            format: self.format,
        }
    }

    /// Load `path` and enqueue it; false when rejected
    ///
    /// Rejections (queue full, decode failure) are logged and reported as
    /// `CueRejected` events; the queue is otherwise unaffected.
    pub fn queue_audio(&self, path: &Path, priority: CuePriority) -> bool {
        match self.try_queue_audio(path, priority) {
            Ok(_) => true,
            Err(e) => {
                warn!("Cue {} rejected: {}", path.display(), e);
                self.events.emit_lossy(EngineEvent::CueRejected {
                    label: label_for(path),
                    reason: e.to_string(),
                    timestamp: chrono::Utc::now(),
                });
                false
            }
        }
    }

    /// Load `path` and enqueue it, returning the new cue id
    pub fn try_queue_audio(&self, path: &Path, priority: CuePriority) -> Result<u64> {
        // Fail fast before paying for a decode
        if priority == CuePriority::Normal {
            self.check_capacity(&self.lock())?;
        }

        let source = self.loader.load(path, self.format)?;
        self.enqueue_source(source, label_for(path), priority)
    }

    /// Enqueue an already-loaded source
    pub fn enqueue_source(
        &self,
        source: Box<dyn SampleSource>,
        label: impl Into<String>,
        priority: CuePriority,
    ) -> Result<u64> {
        if source.format() != self.format {
            return Err(Error::FormatMismatch {
                expected: self.format.to_string(),
                actual: source.format().to_string(),
            });
        }

        let label = label.into();
        let source: Box<dyn SampleSource> = if self.trim_silence {
            Box::new(
                SilenceGate::new(source, &self.silence).with_events(self.events.clone(), label.clone()),
            )
        } else {
            source
        };

        let cue = Cue {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            label,
            priority,
            source,
        };
        let id = cue.id;

        let mut state = self.lock();
        match priority {
            CuePriority::Normal => {
                self.check_capacity(&state)?;
                debug!("Queued cue {} '{}'", id, cue.label);
                state.pending.push_back(cue);
                state.promote();
            }
            CuePriority::Immediate => {
                info!("Immediate cue {} '{}' pre-empting queue", id, cue.label);
                state.interrupt(cue);
            }
        }
        Ok(id)
    }

    fn check_capacity(&self, state: &QueueState) -> Result<()> {
        if state.pending.len() >= self.limit {
            return Err(Error::QueueFull { limit: self.limit });
        }
        Ok(())
    }

    /// Drop every held cue
    pub fn clear(&self) {
        let drained = self.lock().drain();
        debug!("Cue queue cleared ({} cues released)", drained.len());
    }

    /// Drop every held cue, reporting the audible ones as finished
    pub fn stop(&self) {
        let drained = {
            let mut state = self.lock();
            let audible = state.current.is_some() as usize
                + state.crossfade.is_some() as usize
                + state.tails.len();
            let drained = state.drain();
            for cue in drained.iter().take(audible) {
                state.events.emit_lossy(EngineEvent::CueFinished {
                    cue_id: cue.id,
                    label: cue.label.clone(),
                    timestamp: chrono::Utc::now(),
                });
            }
            drained
        };
        info!("Cue queue stopped ({} cues released)", drained.len());
    }

    /// Number of cues held (current, crossfading, staged, and waiting)
    pub fn len(&self) -> usize {
        self.lock().held()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Normal-priority cues waiting behind current and next
    pub fn waiting(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_idle(&self) -> bool {
        self.lock().held() == 0
    }

    pub fn current_cue(&self) -> Option<CueInfo> {
        self.lock().current.as_ref().map(CueInfo::from)
    }

    pub fn next_cue(&self) -> Option<CueInfo> {
        let state = self.lock();
        match &state.crossfade {
            Some(xf) => Some(CueInfo::from(&xf.incoming)),
            None => state.next.as_ref().map(CueInfo::from),
        }
    }

    pub fn is_crossfading(&self) -> bool {
        self.lock().crossfade.is_some()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        lock_state(&self.state)
    }
}

/// Mixer input reading from a [`CueQueue`]
///
/// Reports infinite length; returns fewer samples than requested (down to
/// zero) while the queue is idle, so it must be registered as a persistent
/// mixer input.
pub struct CueQueueSource {
    state: Arc<Mutex<QueueState>>,
    format: SampleFormat,
}

impl SampleSource for CueQueueSource {
    fn format(&self) -> SampleFormat {
        self.format
    }

    fn read(&mut self, buf: &mut [f32]) -> usize {
        lock_state(&self.state).read(buf)
    }

    fn position(&self) -> u64 {
        lock_state(&self.state).samples_delivered
    }

    fn length(&self) -> Option<u64> {
        None
    }
}

fn lock_state(state: &Mutex<QueueState>) -> MutexGuard<'_, QueueState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn label_for(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
