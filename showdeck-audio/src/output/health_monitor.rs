//! Background output health monitoring
//!
//! Every tick the monitor asks two questions without touching the audio
//! path: how long since the mixer was last read, and does the backend
//! report its stream as playing. Only "unread past the grace period AND
//! not playing" is a stall. A playing stream that is simply not being
//! pulled right now is left alone, and so is a session the host stopped.
//!
//! On a stall of the primary tier, recovery to the compatibility backend
//! runs on a blocking worker, guarded by a single-flight flag so
//! overlapping ticks never launch two swaps. The monitor stands down while
//! an explicit device change holds the pause flag.

use super::manager::{OutputManager, ProbeResult, SessionProbe};
use showdeck_common::config::HealthConfig;
use showdeck_common::events::{EngineEvent, EventBus, OutputTier};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

/// Outcome of one health evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthVerdict {
    /// Read within the grace period
    Healthy,
    /// Unread past the grace period, but the backend reports playing
    Idle { idle_ms: u64 },
    /// Unread past the grace period and not playing
    Stalled {
        tier: OutputTier,
        device: String,
        idle_ms: u64,
    },
    /// A device change is in progress
    Paused,
    /// The host stopped output; not a fault
    Stopped,
    NoSession,
    /// The session lock is held elsewhere; try again next tick
    Busy,
    Disposed,
}

/// The stall rule
pub fn is_stalled(idle: Duration, playing: bool, grace: Duration) -> bool {
    idle > grace && !playing
}

/// Periodic stall detector for an [`OutputManager`]
pub struct HealthMonitor {
    manager: Arc<OutputManager>,
    config: HealthConfig,
    verbose: bool,
    events: EventBus,

    /// Last OS default device seen (outer None = not observed yet)
    last_default: Mutex<Option<Option<String>>>,

    task: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    pub fn new(manager: Arc<OutputManager>, config: HealthConfig, events: EventBus, verbose: bool) -> Self {
        Self {
            manager,
            config,
            verbose,
            events,
            last_default: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Judge the current session without acting on the result
    pub fn evaluate(&self) -> HealthVerdict {
        self.assess().0
    }

    fn assess(&self) -> (HealthVerdict, Option<SessionProbe>) {
        if self.manager.is_disposed() {
            return (HealthVerdict::Disposed, None);
        }
        if self.manager.is_health_paused() {
            return (HealthVerdict::Paused, None);
        }

        let probe = match self.manager.probe() {
            ProbeResult::Active(probe) => probe,
            ProbeResult::NoSession => return (HealthVerdict::NoSession, None),
            ProbeResult::Stopped => return (HealthVerdict::Stopped, None),
            ProbeResult::Busy => return (HealthVerdict::Busy, None),
        };

        let idle = self.manager.mixer().time_since_last_read();
        let idle_ms = idle.as_millis() as u64;
        let verdict = if idle <= self.config.stall_grace() {
            HealthVerdict::Healthy
        } else if is_stalled(idle, probe.is_playing, self.config.stall_grace()) {
            HealthVerdict::Stalled {
                tier: probe.tier,
                device: probe.device_name.clone(),
                idle_ms,
            }
        } else {
            HealthVerdict::Idle { idle_ms }
        };
        (verdict, Some(probe))
    }

    /// One tick: evaluate, react to a stall, track the default device
    pub fn check_once(&self) -> HealthVerdict {
        let (verdict, probe) = self.assess();
        if self.verbose {
            trace!("Health check: {:?}", verdict);
        }

        match &verdict {
            HealthVerdict::Stalled {
                tier,
                device,
                idle_ms,
            } => {
                warn!(
                    "Output stalled on '{}' ({} backend): unread for {}ms and not playing",
                    device, tier, idle_ms
                );
                self.events.emit_lossy(EngineEvent::StallDetected {
                    tier: *tier,
                    device: device.clone(),
                    idle_ms: *idle_ms,
                    timestamp: chrono::Utc::now(),
                });
                if *tier == OutputTier::Primary {
                    if let Some(probe) = probe.as_ref() {
                        self.spawn_recovery(probe.generation);
                    }
                } else {
                    error!("Compatibility backend stalled on '{}'; no tier left to fall back to", device);
                }
            }
            HealthVerdict::Idle { idle_ms } => {
                debug!("Mixer unread for {}ms but backend reports playing", idle_ms);
            }
            _ => {}
        }

        if let Some(probe) = probe {
            if probe.device_id.is_none() {
                self.track_default_device();
            }
        }
        verdict
    }

    fn spawn_recovery(&self, stalled: u64) {
        if !self.manager.begin_recovery() {
            debug!("Recovery already in flight");
            return;
        }

        let manager = Arc::clone(&self.manager);
        let job = move || {
            manager.recover_from_stall(stalled);
            manager.end_recovery();
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(job);
            }
            Err(_) => {
                let spawned = std::thread::Builder::new()
                    .name("showdeck-recovery".to_string())
                    .spawn(job);
                if let Err(e) = spawned {
                    error!("Failed to spawn recovery thread: {}", e);
                    self.manager.end_recovery();
                }
            }
        }
    }

    /// Re-enumerate the OS default and report changes
    fn track_default_device(&self) {
        let current = self.manager.default_device_id();
        let mut last = lock(&self.last_default);
        match last.as_ref() {
            Some(previous) if *previous != current => {
                info!(
                    "Default output device changed: {:?} -> {:?}",
                    previous, current
                );
                self.events.emit_lossy(EngineEvent::DefaultDeviceChanged {
                    previous: previous.clone(),
                    current: current.clone(),
                    timestamp: chrono::Utc::now(),
                });
            }
            _ => {}
        }
        *last = Some(current);
    }

    /// Start the periodic task; a no-op if it is already running
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn(self: &Arc<Self>) {
        let mut task = lock(&self.task);
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let monitor = Arc::clone(self);
        let period = self.config.interval();
        info!(
            "Health monitor started ({}ms interval, {}ms grace)",
            self.config.interval_ms, self.config.stall_grace_ms
        );

        *task = Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if monitor.manager.is_disposed() {
                    break;
                }
                // Device enumeration may block
                let tick_monitor = Arc::clone(&monitor);
                if let Err(e) = tokio::task::spawn_blocking(move || tick_monitor.check_once()).await {
                    error!("Health check panicked: {}", e);
                }
            }
            debug!("Health monitor task exiting");
        }));
    }

    pub fn stop(&self) {
        if let Some(handle) = lock(&self.task).take() {
            handle.abort();
            info!("Health monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.task)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
