//! Silence-triggered early completion
//!
//! Wraps one source and watches the peak amplitude of every buffer it
//! forwards. Once the peak has stayed below the threshold for the
//! configured duration, the gate ramps gain linearly to zero and then
//! reports end-of-stream.
//!
//! # States
//!
//! - **Passing**: samples pass unchanged; quiet buffers accumulate
//! - **Fading**: linear ramp 1.0 → 0.0, per frame
//! - **Finished**: `read` returns 0
//!
//! Detection is per call: a buffer whose peak reaches the threshold resets
//! the silent-sample counter, which restarts after that buffer's last loud
//! sample. The fade begins at the frame where the counter crosses the
//! duration, which may be mid-buffer.

use crate::audio::types::{SampleFormat, SampleSource};
use crate::error::Result;
use showdeck_common::config::SilenceConfig;
use showdeck_common::events::{EngineEvent, EventBus};
use showdeck_common::fade_curves::db_to_amplitude;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Passing,
    /// Frames of the ramp already applied
    Fading { done: u64 },
    Finished,
}

/// Silence-detecting pass-through decorator
pub struct SilenceGate<S> {
    inner: S,
    format: SampleFormat,

    /// Linear amplitude below which a buffer counts as silent
    threshold: f32,

    /// Silent samples required before fading (interleaved)
    required_silent: u64,

    /// Ramp length in frames
    fade_frames: u64,

    silent_count: u64,
    state: GateState,

    /// Diagnostics: sink and label for the SilenceDetected notification
    events: Option<(EventBus, String)>,
}

impl<S: SampleSource> SilenceGate<S> {
    pub fn new(inner: S, config: &SilenceConfig) -> Self {
        let format = inner.format();
        let channels = format.channels.max(1) as u64;
        Self {
            inner,
            format,
            threshold: db_to_amplitude(config.threshold_db),
            required_silent: format.samples_for_ms(config.duration_ms),
            fade_frames: format.samples_for_ms(config.fade_ms) / channels,
            silent_count: 0,
            state: GateState::Passing,
            events: None,
        }
    }

    /// Emit `SilenceDetected` on `bus` when silence is first confirmed
    pub fn with_events(mut self, bus: EventBus, label: impl Into<String>) -> Self {
        self.events = Some((bus, label.into()));
        self
    }

    pub fn is_fading(&self) -> bool {
        matches!(self.state, GateState::Fading { .. })
    }

    pub fn is_finished(&self) -> bool {
        self.state == GateState::Finished
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn reset(&mut self) {
        self.silent_count = 0;
        self.state = GateState::Passing;
    }

    /// Returns the offset at which fading should start, if silence was confirmed
    fn detect(&mut self, samples: &[f32]) -> Option<usize> {
        let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));

        // A loud buffer restarts the count after its last loud sample
        let (before, base) = if peak >= self.threshold {
            let last_loud = samples
                .iter()
                .rposition(|s| s.abs() >= self.threshold)
                .unwrap_or(0);
            (0, last_loud + 1)
        } else {
            (self.silent_count, 0)
        };

        self.silent_count = before + (samples.len() - base) as u64;
        if self.silent_count < self.required_silent {
            return None;
        }

        let channels = self.format.channels.max(1) as usize;
        let offset = base + self.required_silent.saturating_sub(before) as usize;
        Some(offset.div_ceil(channels).saturating_mul(channels).min(samples.len()))
    }

    /// Apply the ramp from `start`; returns how many samples remain valid
    fn apply_fade(&mut self, buf: &mut [f32], start: usize) -> usize {
        let GateState::Fading { mut done } = self.state else {
            return buf.len();
        };
        let channels = self.format.channels.max(1) as usize;

        let mut end = start;
        for frame in buf[start..].chunks_mut(channels) {
            if done >= self.fade_frames {
                break;
            }
            done += 1;
            let gain = 1.0 - done as f32 / self.fade_frames as f32;
            for sample in frame.iter_mut() {
                *sample *= gain;
            }
            end += frame.len();
        }

        self.state = if done >= self.fade_frames {
            GateState::Finished
        } else {
            GateState::Fading { done }
        };
        end
    }

    fn notify(&self, position: u64) {
        if let Some((bus, label)) = &self.events {
            bus.emit_lossy(EngineEvent::SilenceDetected {
                label: label.clone(),
                position,
                timestamp: chrono::Utc::now(),
            });
        }
    }
}

impl<S: SampleSource> SampleSource for SilenceGate<S> {
    fn format(&self) -> SampleFormat {
        self.format
    }

    fn read(&mut self, buf: &mut [f32]) -> usize {
        if self.state == GateState::Finished {
            return 0;
        }

        let n = self.inner.read(buf);
        if n == 0 {
            return 0;
        }
        let samples = &mut buf[..n];

        let fade_start = match self.state {
            GateState::Passing => match self.detect(samples) {
                Some(offset) => {
                    self.state = GateState::Fading { done: 0 };
                    let position = self.inner.position().saturating_sub((n - offset) as u64);
                    self.notify(position);
                    offset
                }
                None => return n,
            },
            GateState::Fading { .. } => 0,
            GateState::Finished => return 0,
        };

        self.apply_fade(samples, fade_start)
    }

    fn position(&self) -> u64 {
        self.inner.position()
    }

    fn length(&self) -> Option<u64> {
        self.inner.length()
    }

    fn can_seek(&self) -> bool {
        self.inner.can_seek()
    }

    fn seek(&mut self, position: u64) -> Result<()> {
        self.inner.seek(position)?;
        self.reset();
        Ok(())
    }

    fn remaining(&self) -> Option<u64> {
        let inner = self.inner.remaining();
        match self.state {
            GateState::Passing => inner,
            GateState::Finished => Some(0),
            GateState::Fading { done } => {
                let channels = self.format.channels.max(1) as u64;
                let ramp = (self.fade_frames - done) * channels;
                Some(inner.map_or(ramp, |left| left.min(ramp)))
            }
        }
    }
}
