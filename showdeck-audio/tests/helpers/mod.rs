//! Test helper modules for showdeck-audio integration tests
//!
//! - SimBackend: scripted output devices that pull (or refuse to pull)
//!   from the mixer on a background thread
//! - audio_generator: deterministic WAV files and in-memory sources
//! - Fast configuration presets so verification finishes in milliseconds

#![allow(dead_code)]

pub mod audio_generator;
pub mod sim_backend;

pub use audio_generator::{constant_source, generate_marked_wav, generate_sine_wav, ramp_source};
pub use sim_backend::{DeviceBehavior, SimBackend, SimControl};

use showdeck_common::config::{HealthConfig, VerificationConfig};
use std::time::{Duration, Instant};

/// Verification tuned for tests: 60ms first-read window, 10 x 10ms checks
pub fn fast_verification() -> VerificationConfig {
    VerificationConfig {
        initial_window_ms: 60,
        initial_poll_ms: 2,
        sustained_checks: 10,
        sustained_interval_ms: 10,
        sustained_required: 8,
    }
}

/// Health monitoring tuned for tests: 20ms ticks, 80ms grace
pub fn fast_health() -> HealthConfig {
    HealthConfig {
        interval_ms: 20,
        stall_grace_ms: 80,
    }
}

/// Poll `condition` every 5ms until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
