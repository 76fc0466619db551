//! Simulated output backend
//!
//! Each device has a scripted behavior. A "playing" stream runs a thread
//! that pulls 64 samples from the mixer every 2ms, which is what the flow
//! verifier and health monitor observe.

use showdeck_audio::audio::Gain;
use showdeck_audio::output::{DeviceInfo, OutputBackend, OutputStream};
use showdeck_audio::playback::SampleMixer;
use showdeck_audio::{Error, OutputTier, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// How a simulated device responds once started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceBehavior {
    /// Pulls steadily
    Healthy,
    /// Pulls this many times, then never again
    StallAfter(usize),
    /// Accepts play but never pulls
    Dead,
}

/// Runtime switches shared by every stream of one backend
#[derive(Debug, Default)]
pub struct SimControl {
    /// Stop pulling from the mixer
    pub frozen: AtomicBool,
    /// Report streams as not playing
    pub report_stopped: AtomicBool,
    /// Number of `open` calls
    pub opens: AtomicUsize,
}

impl SimControl {
    /// Simulate a device that silently stopped pulling but claims to play
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::SeqCst);
    }

    /// Simulate a device that stopped and admits it
    pub fn crash(&self) {
        self.frozen.store(true, Ordering::SeqCst);
        self.report_stopped.store(true, Ordering::SeqCst);
    }
}

pub struct SimBackend {
    tier: OutputTier,
    name: String,
    devices: Vec<(String, DeviceBehavior)>,
    default_device: Mutex<Option<String>>,
    pub control: Arc<SimControl>,
}

impl SimBackend {
    /// Backend whose first listed device is the OS default
    pub fn new(tier: OutputTier, devices: &[(&str, DeviceBehavior)]) -> Self {
        Self {
            tier,
            name: format!("sim-{}", tier),
            devices: devices
                .iter()
                .map(|(name, behavior)| (name.to_string(), *behavior))
                .collect(),
            default_device: Mutex::new(devices.first().map(|(name, _)| name.to_string())),
            control: Arc::new(SimControl::default()),
        }
    }

    pub fn set_default(&self, device: Option<&str>) {
        *self.default_device.lock().unwrap() = device.map(str::to_string);
    }

    pub fn opens(&self) -> usize {
        self.control.opens.load(Ordering::SeqCst)
    }

    fn behavior(&self, device: &str) -> Option<DeviceBehavior> {
        self.devices
            .iter()
            .find(|(name, _)| name == device)
            .map(|(_, behavior)| *behavior)
    }
}

impl OutputBackend for SimBackend {
    fn tier(&self) -> OutputTier {
        self.tier
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        let default = self.default_device.lock().unwrap().clone();
        Ok(self
            .devices
            .iter()
            .map(|(name, _)| DeviceInfo {
                id: Some(name.clone()),
                name: name.clone(),
                is_default: default.as_deref() == Some(name.as_str()),
            })
            .collect())
    }

    fn default_device_id(&self) -> Option<String> {
        self.default_device.lock().unwrap().clone()
    }

    fn open(&self, device: Option<&str>, mixer: Arc<SampleMixer>, _master: Gain) -> Result<Box<dyn OutputStream>> {
        self.control.opens.fetch_add(1, Ordering::SeqCst);

        let name = match device {
            Some(id) => id.to_string(),
            None => self
                .default_device_id()
                .ok_or_else(|| Error::DeviceNotFound("no default device".to_string()))?,
        };
        let behavior = self
            .behavior(&name)
            .ok_or_else(|| Error::DeviceNotFound(name.clone()))?;

        Ok(Box::new(SimStream {
            name,
            behavior,
            mixer,
            control: Arc::clone(&self.control),
            playing: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(AtomicBool::new(false)),
            worker: None,
        }))
    }
}

struct SimStream {
    name: String,
    behavior: DeviceBehavior,
    mixer: Arc<SampleMixer>,
    control: Arc<SimControl>,
    playing: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl OutputStream for SimStream {
    fn play(&mut self) -> Result<()> {
        self.playing.store(true, Ordering::SeqCst);
        if self.worker.is_some() {
            return Ok(());
        }

        let limit = match self.behavior {
            DeviceBehavior::Healthy => usize::MAX,
            DeviceBehavior::StallAfter(pulls) => pulls,
            DeviceBehavior::Dead => 0,
        };
        let mixer = Arc::clone(&self.mixer);
        let control = Arc::clone(&self.control);
        let playing = Arc::clone(&self.playing);
        let shutdown = Arc::clone(&self.shutdown);

        self.worker = Some(std::thread::spawn(move || {
            let mut buf = vec![0.0f32; 64];
            let mut pulls = 0usize;
            while !shutdown.load(Ordering::SeqCst) {
                let active = playing.load(Ordering::SeqCst) && !control.frozen.load(Ordering::SeqCst);
                if active && pulls < limit {
                    mixer.read(&mut buf);
                    pulls += 1;
                }
                std::thread::sleep(Duration::from_millis(2));
            }
        }));
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.playing.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst) && !self.control.report_stopped.load(Ordering::SeqCst)
    }

    fn device_name(&self) -> String {
        self.name.clone()
    }
}

impl Drop for SimStream {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
