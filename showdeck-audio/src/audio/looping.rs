//! Seamless looping decorator

use super::types::{SampleFormat, SampleSource};
use crate::error::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Restarts the inner source from position 0 on end-of-stream
///
/// Looping only happens when enabled and the inner source can seek;
/// otherwise end-of-stream passes through. The loop flag is shared so a
/// caller can stop looping without touching the audio thread.
pub struct LoopSource<S> {
    inner: S,
    looping: Arc<AtomicBool>,
    loops_completed: u64,
}

impl<S: SampleSource> LoopSource<S> {
    pub fn new(inner: S, looping: bool) -> Self {
        Self {
            inner,
            looping: Arc::new(AtomicBool::new(looping)),
            loops_completed: 0,
        }
    }

    /// Handle for toggling looping from another thread
    pub fn loop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.looping)
    }

    pub fn loops_completed(&self) -> u64 {
        self.loops_completed
    }

    fn should_loop(&self) -> bool {
        self.looping.load(Ordering::Relaxed) && self.inner.can_seek()
    }
}

impl<S: SampleSource> SampleSource for LoopSource<S> {
    fn format(&self) -> SampleFormat {
        self.inner.format()
    }

    fn read(&mut self, buf: &mut [f32]) -> usize {
        let mut filled = 0;

        while filled < buf.len() {
            let n = self.inner.read(&mut buf[filled..]);
            if n > 0 {
                filled += n;
                continue;
            }

            // End of stream: wrap around, unless that would spin on an empty source
            if !self.should_loop() || self.inner.length() == Some(0) {
                break;
            }
            if self.inner.seek(0).is_err() {
                break;
            }
            self.loops_completed += 1;

            // A source that still yields nothing after rewinding is treated as ended
            let n = self.inner.read(&mut buf[filled..]);
            if n == 0 {
                break;
            }
            filled += n;
        }

        filled
    }

    fn position(&self) -> u64 {
        self.inner.position()
    }

    fn length(&self) -> Option<u64> {
        if self.should_loop() {
            None
        } else {
            self.inner.length()
        }
    }

    fn can_seek(&self) -> bool {
        self.inner.can_seek()
    }

    fn seek(&mut self, position: u64) -> Result<()> {
        self.inner.seek(position)
    }
}
