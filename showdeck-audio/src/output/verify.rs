//! Empirical flow verification
//!
//! A successful open/play call proves nothing on some virtual and wireless
//! devices: they accept initialization and then never pull a sample, or
//! pull a burst and stop. The only trustworthy signal is the mixer's read
//! position advancing.
//!
//! - **Phase A**: poll until the position moves at all, within a short window
//! - **Phase B**: sample the position at a fixed interval and require it to
//!   have advanced in most of the checks
//!
//! Blocks the calling thread for at most
//! [`VerificationConfig::worst_case`]. Never call it from the audio path.

use super::session::FlowReport;
use crate::error::{Error, Result};
use crate::playback::mixer::SampleMixer;
use showdeck_common::config::VerificationConfig;
use std::time::Instant;
use tracing::{debug, trace};

/// Verify that something is pulling from `mixer`
///
/// `device` only labels errors and logs. With `verbose`, every poll is
/// traced.
pub fn verify_flow(
    mixer: &SampleMixer,
    config: &VerificationConfig,
    device: &str,
    verbose: bool,
) -> Result<FlowReport> {
    let started = Instant::now();
    let origin = mixer.last_read_position();

    // Phase A
    let deadline = started + config.initial_window();
    let first_read_after = loop {
        let position = mixer.last_read_position();
        if verbose {
            trace!("Flow poll on '{}': position {} (origin {})", device, position, origin);
        }
        if position != origin {
            break started.elapsed();
        }
        if Instant::now() >= deadline {
            debug!("No flow from '{}' within {:?}", device, config.initial_window());
            return Err(Error::FlowNotEstablished {
                device: device.to_string(),
                window_ms: config.initial_window_ms,
            });
        }
        std::thread::sleep(config.initial_poll());
    };

    // Phase B
    let mut previous = mixer.last_read_position();
    let mut successes = 0;
    for check in 1..=config.sustained_checks {
        std::thread::sleep(config.sustained_interval());
        let position = mixer.last_read_position();
        let advanced = position > previous;
        if advanced {
            successes += 1;
        }
        if verbose {
            trace!(
                "Sustained check {}/{} on '{}': position {} ({})",
                check,
                config.sustained_checks,
                device,
                position,
                if advanced { "advanced" } else { "stuck" }
            );
        }
        previous = position;
    }

    if successes < config.sustained_required {
        debug!(
            "Flow on '{}' not sustained: {}/{} checks advanced",
            device, successes, config.sustained_checks
        );
        return Err(Error::FlowStalled {
            device: device.to_string(),
            successes,
            checks: config.sustained_checks,
        });
    }

    Ok(FlowReport {
        first_read_after,
        successes,
        checks: config.sustained_checks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::types::SampleFormat;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn fast_config() -> VerificationConfig {
        VerificationConfig {
            initial_window_ms: 60,
            initial_poll_ms: 2,
            sustained_checks: 10,
            sustained_interval_ms: 10,
            sustained_required: 8,
        }
    }

    /// Pull from the mixer every 2ms until `pulls` reads or `stop` is set
    fn spawn_reader(mixer: Arc<SampleMixer>, pulls: usize, stop: Arc<AtomicBool>) {
        std::thread::spawn(move || {
            let mut buf = [0.0f32; 64];
            for _ in 0..pulls {
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                mixer.read(&mut buf);
                std::thread::sleep(Duration::from_millis(2));
            }
        });
    }

    #[test]
    fn test_no_reader_is_flow_not_established() {
        let mixer = SampleMixer::new(SampleFormat::stereo_44k());
        let result = verify_flow(&mixer, &fast_config(), "ghost", false);
        assert!(matches!(result, Err(Error::FlowNotEstablished { window_ms: 60, .. })));
    }

    #[test]
    fn test_steady_reader_passes() {
        let mixer = Arc::new(SampleMixer::new(SampleFormat::stereo_44k()));
        let stop = Arc::new(AtomicBool::new(false));
        spawn_reader(Arc::clone(&mixer), usize::MAX, Arc::clone(&stop));

        let report = verify_flow(&mixer, &fast_config(), "speakers", true).unwrap();
        stop.store(true, Ordering::Relaxed);

        assert!(report.successes >= 8);
        assert_eq!(report.checks, 10);
    }

    #[test]
    fn test_burst_then_stop_is_flow_stalled() {
        let mixer = Arc::new(SampleMixer::new(SampleFormat::stereo_44k()));
        spawn_reader(Arc::clone(&mixer), 2, Arc::new(AtomicBool::new(false)));

        let result = verify_flow(&mixer, &fast_config(), "wireless", false);
        match result {
            Err(Error::FlowStalled { successes, checks, .. }) => {
                assert!(successes <= 7);
                assert_eq!(checks, 10);
            }
            other => panic!("expected FlowStalled, got {:?}", other),
        }
    }
}
