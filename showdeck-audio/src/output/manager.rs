//! Output manager: verified fallback chain and device hot-swap
//!
//! Owns the single active output session. Every mutation of it (initialize,
//! change device, start, stop, background stall recovery) happens under one
//! mutex, so device swaps are serialized against each other. The audio
//! path never takes this lock.
//!
//! # Fallback chain
//!
//! 1. Primary backend, requested device (or system default)
//! 2. Primary backend, system default (only if step 1 named a specific,
//!    non-default device)
//! 3. Compatibility backend, requested device if it enumerates there,
//!    otherwise system default
//!
//! A tier is accepted only after [`verify_flow`] has seen the mixer being
//! read, first at all and then steadily. If every tier fails the caller
//! gets `BackendExhausted` and no session is left behind.
//!
//! All operations here block (verification sleeps for up to about 1.5s per
//! tier). Async callers go through `spawn_blocking`.

use super::backend::{DeviceInfo, OutputBackend, OutputStream};
use super::session::OutputSession;
use super::verify::verify_flow;
use crate::audio::gain::Gain;
use crate::error::{Error, Result};
use crate::playback::mixer::SampleMixer;
use showdeck_common::config::VerificationConfig;
use showdeck_common::events::{EngineEvent, EventBus, OutputTier};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use tracing::{debug, error, info, warn};

/// A stream that passed flow verification, with its session record
pub struct VerifiedOutput {
    pub session: OutputSession,
    stream: Box<dyn OutputStream>,
}

impl VerifiedOutput {
    pub fn stream(&self) -> &dyn OutputStream {
        self.stream.as_ref()
    }
}

#[derive(Default)]
struct ManagerState {
    active: Option<VerifiedOutput>,
    /// Last device id the host asked for
    requested: Option<String>,
    /// Bumped every time a session is installed
    generation: u64,
    /// Set by an explicit `stop()`; the monitor must not undo it
    stopped_by_host: bool,
}

impl ManagerState {
    fn install(&mut self, active: VerifiedOutput) {
        self.generation += 1;
        self.active = Some(active);
        self.stopped_by_host = false;
    }
}

/// What the health monitor needs to judge a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionProbe {
    pub tier: OutputTier,
    pub device_id: Option<String>,
    pub device_name: String,
    pub is_playing: bool,
    /// Identity of the probed session, for [`OutputManager::recover_from_stall`]
    pub generation: u64,
}

/// Outcome of a non-blocking session probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
    Active(SessionProbe),
    NoSession,
    /// The host stopped output deliberately
    Stopped,
    /// Another thread holds the session lock (swap or verification running)
    Busy,
}

/// Clears the health pause flag when dropped
struct HealthPause<'a>(&'a AtomicBool);

impl<'a> HealthPause<'a> {
    fn engage(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for HealthPause<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Owner of the live output session
pub struct OutputManager {
    mixer: Arc<SampleMixer>,
    primary: Arc<dyn OutputBackend>,
    compatibility: Arc<dyn OutputBackend>,
    verification: VerificationConfig,
    verbose: bool,
    master: Gain,
    events: EventBus,
    state: Mutex<ManagerState>,

    /// Set during explicit initialize/change_device; the monitor stands down
    health_paused: AtomicBool,

    /// Single-flight guard for background recovery
    recovery_in_flight: AtomicBool,

    disposed: AtomicBool,
}

impl OutputManager {
    pub fn new(
        mixer: Arc<SampleMixer>,
        primary: Arc<dyn OutputBackend>,
        compatibility: Arc<dyn OutputBackend>,
        verification: VerificationConfig,
        master_volume: f32,
        events: EventBus,
        verbose: bool,
    ) -> Self {
        Self {
            mixer,
            primary,
            compatibility,
            verification,
            verbose,
            master: Gain::new(master_volume),
            events,
            state: Mutex::new(ManagerState::default()),
            health_paused: AtomicBool::new(false),
            recovery_in_flight: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    /// Establish output on `device` (None = system default)
    ///
    /// Replaces any existing session. On success the stream is playing.
    ///
    /// # Errors
    /// `BackendExhausted` when no tier verified; `Disposed` after shutdown.
    pub fn initialize(&self, device: Option<&str>) -> Result<OutputSession> {
        self.ensure_live()?;
        let _pause = HealthPause::engage(&self.health_paused);
        let mut state = self.lock();

        close_active(&mut state);
        state.requested = device.map(str::to_string);

        self.establish(&mut state, device)
    }

    /// Move output to another device, keeping every mixer input intact
    ///
    /// Playback is restarted afterwards regardless of its previous state.
    /// If no tier verifies, the previous device is tried again so output
    /// is not left dead, but the error is still returned.
    pub fn change_device(&self, device: Option<&str>) -> Result<OutputSession> {
        self.ensure_live()?;
        let _pause = HealthPause::engage(&self.health_paused);
        let mut state = self.lock();

        let previous = state.requested.clone();
        info!(
            "Changing output device: {} -> {}",
            describe(previous.as_deref()),
            describe(device)
        );
        close_active(&mut state);
        state.requested = device.map(str::to_string);

        match self.establish(&mut state, device) {
            Ok(session) => Ok(session),
            Err(e) => {
                if previous.as_deref() != device {
                    warn!("Restoring previous device {}", describe(previous.as_deref()));
                    if self.establish(&mut state, previous.as_deref()).is_ok() {
                        state.requested = previous;
                    }
                }
                Err(e)
            }
        }
    }

    /// Resume a paused session
    pub fn start(&self) -> Result<()> {
        self.ensure_live()?;
        let mut state = self.lock();
        let active = state
            .active
            .as_mut()
            .ok_or_else(|| Error::AudioOutput("No output session".to_string()))?;
        active.stream.play()?;
        info!("Output started on {}", active.session.device_name);
        state.stopped_by_host = false;
        Ok(())
    }

    /// Pause the session; it stays established
    ///
    /// The health monitor leaves a stopped session alone until `start`,
    /// `initialize` or `change_device`.
    pub fn stop(&self) -> Result<()> {
        let mut state = self.lock();
        if let Some(active) = state.active.as_mut() {
            active.stream.pause()?;
            info!("Output stopped on {}", active.session.device_name);
            state.stopped_by_host = true;
        }
        Ok(())
    }

    pub fn set_master_volume(&self, volume: f32) {
        self.master.set(volume);
        debug!("Master volume set to {:.2}", self.master.get());
    }

    pub fn master_volume(&self) -> f32 {
        self.master.get()
    }

    pub fn is_playing(&self) -> bool {
        self.lock()
            .active
            .as_ref()
            .map(|active| active.stream.is_playing())
            .unwrap_or(false)
    }

    pub fn active_session(&self) -> Option<OutputSession> {
        self.lock().active.as_ref().map(|active| active.session.clone())
    }

    /// "System Default" first, then every device the primary backend sees
    pub fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        let mut devices = vec![DeviceInfo::system_default()];
        devices.extend(self.primary.list_devices()?);
        Ok(devices)
    }

    /// Current OS default device id, enumerated fresh
    pub fn default_device_id(&self) -> Option<String> {
        self.primary.default_device_id()
    }

    /// Close the session and refuse further work
    ///
    /// A recovery already running notices the flag before touching state.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut state = self.lock();
        close_active(&mut state);
        info!("Output manager disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn is_health_paused(&self) -> bool {
        self.health_paused.load(Ordering::SeqCst)
    }

    pub fn mixer(&self) -> &Arc<SampleMixer> {
        &self.mixer
    }

    /// Inspect the session without waiting on the lock
    pub fn probe(&self) -> ProbeResult {
        let state = match self.state.try_lock() {
            Ok(state) => state,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return ProbeResult::Busy,
        };
        match state.active.as_ref() {
            Some(_) if state.stopped_by_host => ProbeResult::Stopped,
            Some(active) => ProbeResult::Active(SessionProbe {
                tier: active.session.tier,
                device_id: active.session.device_id.clone(),
                device_name: active.session.device_name.clone(),
                is_playing: active.stream.is_playing(),
                generation: state.generation,
            }),
            None => ProbeResult::NoSession,
        }
    }

    /// Claim the single recovery slot; false if one is already running
    pub fn begin_recovery(&self) -> bool {
        self.recovery_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn end_recovery(&self) {
        self.recovery_in_flight.store(false, Ordering::SeqCst);
    }

    pub fn is_recovering(&self) -> bool {
        self.recovery_in_flight.load(Ordering::SeqCst)
    }

    /// Swap a stalled primary session to the compatibility backend
    ///
    /// `stalled` is the generation of the session judged stalled; if the
    /// host replaced or stopped it meanwhile, nothing happens. Keeps the
    /// same device, falling back to the compatibility default if that
    /// device fails. The primary backend is not retried. Failures are
    /// logged, never returned.
    pub fn recover_from_stall(&self, stalled: u64) {
        if self.is_disposed() || self.is_health_paused() {
            return;
        }
        let mut state = self.lock();
        if self.is_disposed() {
            debug!("Recovery abandoned: output disposed");
            return;
        }
        if state.generation != stalled {
            debug!("Recovery abandoned: session was replaced");
            return;
        }
        if state.stopped_by_host {
            debug!("Recovery abandoned: output stopped by host");
            return;
        }

        let device = match state.active.as_ref() {
            Some(active) if active.session.tier == OutputTier::Primary => {
                active.session.device_id.clone()
            }
            _ => {
                debug!("Recovery skipped: no primary session");
                return;
            }
        };

        warn!(
            "Recovering stalled output on {}: switching to {} backend",
            describe(device.as_deref()),
            self.compatibility.name()
        );
        close_active(&mut state);

        let mut attempts = Vec::new();
        let mut targets = vec![device.clone()];
        if device.is_some() {
            targets.push(None);
        }
        for target in targets {
            if self.is_disposed() {
                debug!("Recovery abandoned: output disposed");
                return;
            }
            match self.try_initialize_output(self.compatibility.as_ref(), target.as_deref()) {
                Ok(active) => {
                    info!("Recovered output: {}", active.session);
                    self.announce(&active.session);
                    state.install(active);
                    return;
                }
                Err(e) => {
                    warn!("Recovery on {} failed: {}", describe(target.as_deref()), e);
                    attempts.push(format!("{}/{}: {}", OutputTier::Compatibility, describe(target.as_deref()), e));
                }
            }
        }

        let exhausted = Error::BackendExhausted { attempts };
        error!("Stall recovery failed, no output active: {}", exhausted);
        self.events.emit_lossy(EngineEvent::OutputLost {
            reason: exhausted.to_string(),
            timestamp: chrono::Utc::now(),
        });
    }

    /// Run the chain and install the winner; emits OutputSelected/OutputLost
    fn establish(&self, state: &mut ManagerState, device: Option<&str>) -> Result<OutputSession> {
        match self.run_chain(device) {
            Ok(active) => {
                let session = active.session.clone();
                info!("Output established: {}", session);
                self.announce(&session);
                state.install(active);
                Ok(session)
            }
            Err(e) => {
                error!("No audio output available: {}", e);
                self.events.emit_lossy(EngineEvent::OutputLost {
                    reason: e.to_string(),
                    timestamp: chrono::Utc::now(),
                });
                Err(e)
            }
        }
    }

    fn run_chain(&self, device: Option<&str>) -> Result<VerifiedOutput> {
        let mut attempts = Vec::new();

        let mut plan: Vec<(&dyn OutputBackend, Option<&str>)> =
            vec![(self.primary.as_ref(), device)];

        if let Some(id) = device {
            if self.primary.default_device_id().as_deref() != Some(id) {
                plan.push((self.primary.as_ref(), None));
            }
        }

        let compatibility_device = device.filter(|id| self.compatibility.has_device(id));
        if device.is_some() && compatibility_device.is_none() {
            debug!(
                "{} not listed by {} backend, using its default",
                describe(device),
                self.compatibility.name()
            );
        }
        plan.push((self.compatibility.as_ref(), compatibility_device));

        for (backend, target) in plan {
            if self.is_disposed() {
                return Err(Error::Disposed);
            }
            match self.try_initialize_output(backend, target) {
                Ok(active) => return Ok(active),
                Err(e) => {
                    warn!(
                        "{} tier on {} failed: {}",
                        backend.tier(),
                        describe(target),
                        e
                    );
                    attempts.push(format!("{}/{}: {}", backend.tier(), describe(target), e));
                }
            }
        }

        Err(Error::BackendExhausted { attempts })
    }

    /// Open, play, and verify one tier/device combination
    ///
    /// A stream that fails verification is paused and closed before
    /// returning.
    pub fn try_initialize_output(
        &self,
        backend: &dyn OutputBackend,
        device: Option<&str>,
    ) -> Result<VerifiedOutput> {
        debug!("Trying {} tier ({}) on {}", backend.tier(), backend.name(), describe(device));

        let mut stream = backend.open(device, Arc::clone(&self.mixer), self.master.clone())?;
        let device_name = stream.device_name();

        let verified = stream
            .play()
            .and_then(|_| verify_flow(&self.mixer, &self.verification, &device_name, self.verbose));

        match verified {
            Ok(flow) => Ok(VerifiedOutput {
                session: OutputSession {
                    tier: backend.tier(),
                    backend: backend.name().to_string(),
                    device_id: device.map(str::to_string),
                    device_name,
                    flow,
                    established_at: chrono::Utc::now(),
                },
                stream,
            }),
            Err(e) => {
                if let Err(pause_err) = stream.pause() {
                    debug!("Pause after failed verification: {}", pause_err);
                }
                Err(e)
            }
        }
    }

    fn announce(&self, session: &OutputSession) {
        self.events.emit_lossy(EngineEvent::OutputSelected {
            tier: session.tier,
            device: session.device_name.clone(),
            timestamp: chrono::Utc::now(),
        });
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::Disposed);
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Pause and drop the active stream, if any
fn close_active(state: &mut ManagerState) {
    if let Some(mut active) = state.active.take() {
        if let Err(e) = active.stream.pause() {
            debug!("Pause on close failed: {}", e);
        }
        debug!("Closed output on {}", active.session.device_name);
    }
}

fn describe(device: Option<&str>) -> String {
    match device {
        Some(id) => format!("'{}'", id),
        None => "system default".to_string(),
    }
}
