//! Output backends built on cpal
//!
//! Two configurations of the same library serve as the two tiers:
//!
//! - **Primary**: default host, f32 at the engine rate, small fixed buffer
//! - **Compatibility**: an alternative host when the platform has one
//!   (otherwise the default host), the device's own default config in any
//!   of f32/i16/u16, and the device's default buffer size. A device that
//!   cannot run at the engine rate is fed through a [`StreamResampler`].
//!
//! cpal streams are not `Send`. Each stream therefore lives on its own
//! output thread, and the handle given to the manager talks to it over a
//! command channel.

use super::backend::{DeviceInfo, OutputBackend, OutputStream};
use crate::audio::gain::Gain;
use crate::audio::resampler::StreamResampler;
use crate::error::{Error, Result};
use crate::playback::mixer::SampleMixer;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Host, HostId, Sample, SizedSample, Stream, StreamConfig};
use cpal::SampleFormat as CpalFormat;
use showdeck_common::events::OutputTier;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How long to wait for the output thread to build a stream
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait for play/pause to be acknowledged
const COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Callback scratch in frames, unless the configured buffer is larger;
/// longer callbacks are rendered in pieces of this size
const CALLBACK_SCRATCH_FRAMES: usize = 4096;

/// cpal-based output backend
pub struct CpalBackend {
    tier: OutputTier,
    host_id: HostId,
    name: String,
    /// Fixed callback buffer in frames (None = device default)
    buffer_frames: Option<u32>,
}

impl CpalBackend {
    /// Low-latency tier on the platform's default host
    pub fn primary(buffer_frames: Option<u32>) -> Self {
        let host_id = cpal::default_host().id();
        Self {
            tier: OutputTier::Primary,
            host_id,
            name: host_id.name().to_string(),
            buffer_frames,
        }
    }

    /// Broad-compatibility tier
    pub fn compatibility(buffer_frames: Option<u32>) -> Self {
        let default_id = cpal::default_host().id();
        let host_id = cpal::available_hosts()
            .into_iter()
            .find(|id| *id != default_id)
            .unwrap_or(default_id);
        Self {
            tier: OutputTier::Compatibility,
            host_id,
            name: host_id.name().to_string(),
            buffer_frames,
        }
    }

    fn host(&self) -> Result<Host> {
        cpal::host_from_id(self.host_id)
            .map_err(|e| Error::AudioOutput(format!("Host {} unavailable: {}", self.name, e)))
    }
}

impl OutputBackend for CpalBackend {
    fn tier(&self) -> OutputTier {
        self.tier
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        let host = self.host()?;
        let default_name = host.default_output_device().and_then(|d| d.name().ok());

        let devices: Vec<DeviceInfo> = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .map(|name| DeviceInfo {
                is_default: default_name.as_deref() == Some(name.as_str()),
                id: Some(name.clone()),
                name,
            })
            .collect();

        debug!("{} backend: found {} output devices", self.name, devices.len());
        Ok(devices)
    }

    fn default_device_id(&self) -> Option<String> {
        self.host()
            .ok()?
            .default_output_device()
            .and_then(|d| d.name().ok())
    }

    fn open(
        &self,
        device: Option<&str>,
        mixer: Arc<SampleMixer>,
        master: Gain,
    ) -> Result<Box<dyn OutputStream>> {
        let params = StreamParams {
            host_id: self.host_id,
            tier: self.tier,
            device: device.map(str::to_string),
            buffer_frames: self.buffer_frames,
        };
        let stream = CpalStream::spawn(params, mixer, master)?;
        Ok(Box::new(stream))
    }
}

/// Everything the output thread needs to build its stream
struct StreamParams {
    host_id: HostId,
    tier: OutputTier,
    device: Option<String>,
    buffer_frames: Option<u32>,
}

enum Command {
    Play(std_mpsc::Sender<Result<()>>),
    Pause(std_mpsc::Sender<Result<()>>),
}

/// `Send` handle to a stream owned by its output thread
struct CpalStream {
    commands: Option<std_mpsc::Sender<Command>>,
    playing: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
    device_name: String,
    thread: Option<JoinHandle<()>>,
}

impl CpalStream {
    fn spawn(params: StreamParams, mixer: Arc<SampleMixer>, master: Gain) -> Result<Self> {
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<String>>();
        let (command_tx, command_rx) = std_mpsc::channel::<Command>();
        let failed = Arc::new(AtomicBool::new(false));
        let thread_failed = Arc::clone(&failed);
        let thread_name = format!("showdeck-output-{}", params.tier);

        let thread = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                let (stream, name) = match build(&params, mixer, master, thread_failed) {
                    Ok(built) => built,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(name));
                run_commands(stream, command_rx);
            })
            .map_err(|e| Error::AudioOutput(format!("Failed to spawn output thread: {}", e)))?;

        let device_name = match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(name)) => name,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                // Leave a hung driver call behind rather than block on it
                return Err(Error::AudioOutput(format!(
                    "Output thread did not report within {:?}",
                    OPEN_TIMEOUT
                )));
            }
        };

        Ok(Self {
            commands: Some(command_tx),
            playing: Arc::new(AtomicBool::new(false)),
            failed,
            device_name,
            thread: Some(thread),
        })
    }

    fn request(&self, make: fn(std_mpsc::Sender<Result<()>>) -> Command) -> Result<()> {
        let commands = self
            .commands
            .as_ref()
            .ok_or_else(|| Error::AudioOutput("Stream closed".to_string()))?;
        let (reply_tx, reply_rx) = std_mpsc::channel();
        commands
            .send(make(reply_tx))
            .map_err(|_| Error::AudioOutput("Output thread exited".to_string()))?;
        reply_rx
            .recv_timeout(COMMAND_TIMEOUT)
            .map_err(|_| Error::AudioOutput("Output thread did not respond".to_string()))?
    }
}

impl OutputStream for CpalStream {
    fn play(&mut self) -> Result<()> {
        self.request(Command::Play)?;
        self.playing.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.playing.store(false, Ordering::SeqCst);
        self.request(Command::Pause)
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst) && !self.failed.load(Ordering::SeqCst)
    }

    fn device_name(&self) -> String {
        self.device_name.clone()
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        // Closing the command channel ends the thread, which drops the stream
        self.commands.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Output thread for '{}' panicked", self.device_name);
            }
        }
        debug!("Output stream on '{}' closed", self.device_name);
    }
}

fn run_commands(stream: Stream, commands: std_mpsc::Receiver<Command>) {
    while let Ok(command) = commands.recv() {
        match command {
            Command::Play(reply) => {
                let result = stream
                    .play()
                    .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {}", e)));
                let _ = reply.send(result);
            }
            Command::Pause(reply) => {
                let result = stream
                    .pause()
                    .map_err(|e| Error::AudioOutput(format!("Failed to pause stream: {}", e)));
                let _ = reply.send(result);
            }
        }
    }
}

/// Find the device, pick a config, and build a paused stream
fn build(
    params: &StreamParams,
    mixer: Arc<SampleMixer>,
    master: Gain,
    failed: Arc<AtomicBool>,
) -> Result<(Stream, String)> {
    let host = cpal::host_from_id(params.host_id)
        .map_err(|e| Error::AudioOutput(format!("Host unavailable: {}", e)))?;
    let device = find_device(&host, params.device.as_deref())?;
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    let engine = mixer.format();
    let (mut config, sample_format) = match params.tier {
        OutputTier::Primary => primary_config(&device, engine.sample_rate, engine.channels)?,
        OutputTier::Compatibility => compatibility_config(&device, engine.sample_rate)?,
    };
    if let Some(frames) = params.buffer_frames {
        config.buffer_size = cpal::BufferSize::Fixed(frames);
    }

    info!(
        "Opening '{}' ({} tier): {}Hz, {} channels, {:?}, buffer {:?}",
        device_name, params.tier, config.sample_rate.0, config.channels, sample_format, config.buffer_size
    );
    let resampler = if config.sample_rate.0 != engine.sample_rate {
        warn!(
            "'{}' runs at {}Hz, engine mixes at {}Hz; resampling output",
            device_name, config.sample_rate.0, engine.sample_rate
        );
        Some(StreamResampler::new(engine.sample_rate, config.sample_rate.0, engine.channels)?)
    } else {
        None
    };

    let scratch_frames = params
        .buffer_frames
        .map_or(CALLBACK_SCRATCH_FRAMES, |frames| CALLBACK_SCRATCH_FRAMES.max(frames as usize));
    let renderer = Renderer::new(mixer, master, config.channels, scratch_frames, resampler);

    let stream = match sample_format {
        CpalFormat::F32 => build_stream::<f32>(&device, &config, renderer, failed)?,
        CpalFormat::I16 => build_stream::<i16>(&device, &config, renderer, failed)?,
        CpalFormat::U16 => build_stream::<u16>(&device, &config, renderer, failed)?,
        other => {
            return Err(Error::AudioOutput(format!(
                "Unsupported sample format: {:?}",
                other
            )));
        }
    };

    // Some hosts start streams on build
    if let Err(e) = stream.pause() {
        debug!("Stream on '{}' cannot pause before play: {}", device_name, e);
    }

    Ok((stream, device_name))
}

fn find_device(host: &Host, id: Option<&str>) -> Result<Device> {
    match id {
        None => host
            .default_output_device()
            .ok_or_else(|| Error::DeviceNotFound("system default".to_string())),
        Some(id) => host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
            .find(|d| d.name().ok().as_deref() == Some(id))
            .ok_or_else(|| Error::DeviceNotFound(id.to_string())),
    }
}

/// f32 at the engine rate, engine channel count preferred
fn primary_config(device: &Device, rate: u32, channels: u16) -> Result<(StreamConfig, CpalFormat)> {
    let candidates: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| Error::AudioOutput(format!("Failed to get device configs: {}", e)))?
        .filter(|c| {
            c.sample_format() == CpalFormat::F32
                && c.min_sample_rate().0 <= rate
                && c.max_sample_rate().0 >= rate
        })
        .collect();

    let chosen = candidates
        .iter()
        .find(|c| c.channels() == channels)
        .or_else(|| candidates.first())
        .ok_or_else(|| Error::AudioOutput(format!("No f32 output config at {}Hz", rate)))?;

    let supported = chosen.clone().with_sample_rate(cpal::SampleRate(rate));
    Ok((supported.config(), CpalFormat::F32))
}

/// The device's own default, unless it is at a different rate and some
/// supported config covers the engine rate
fn compatibility_config(device: &Device, rate: u32) -> Result<(StreamConfig, CpalFormat)> {
    let default = device
        .default_output_config()
        .map_err(|e| Error::AudioOutput(format!("Failed to get default config: {}", e)))?;
    if default.sample_rate().0 == rate {
        return Ok((default.config(), default.sample_format()));
    }

    let usable = [CpalFormat::F32, CpalFormat::I16, CpalFormat::U16];
    if let Ok(mut configs) = device.supported_output_configs() {
        if let Some(range) = configs.find(|c| {
            usable.contains(&c.sample_format())
                && c.min_sample_rate().0 <= rate
                && c.max_sample_rate().0 >= rate
        }) {
            let supported = range.with_sample_rate(cpal::SampleRate(rate));
            return Ok((supported.config(), supported.sample_format()));
        }
    }

    Ok((default.config(), default.sample_format()))
}

/// Callback-side state: pulls from the mixer and writes device samples
///
/// Maps channels (duplicating or dropping), applies master volume, and
/// clamps. Nothing here allocates after construction.
struct Renderer {
    mixer: Arc<SampleMixer>,
    master: Gain,
    device_channels: usize,
    engine_channels: usize,
    scratch: Vec<f32>,
    resampler: Option<StreamResampler>,
}

impl Renderer {
    fn new(
        mixer: Arc<SampleMixer>,
        master: Gain,
        device_channels: u16,
        scratch_frames: usize,
        resampler: Option<StreamResampler>,
    ) -> Self {
        let engine_channels = mixer.format().channels.max(1) as usize;
        Self {
            mixer,
            master,
            device_channels: device_channels.max(1) as usize,
            engine_channels,
            scratch: vec![0.0; scratch_frames.max(1) * engine_channels],
            resampler,
        }
    }

    fn render<T>(&mut self, data: &mut [T])
    where
        T: Sample + FromSample<f32>,
    {
        let chunk_frames = self.scratch.len() / self.engine_channels;
        let volume = self.master.get();

        for out in data.chunks_mut(chunk_frames * self.device_channels) {
            let frames = out.len() / self.device_channels;
            let mixed = &mut self.scratch[..frames * self.engine_channels];
            let mixer = &self.mixer;
            match self.resampler.as_mut() {
                Some(resampler) => resampler.fill(mixed, |buf| {
                    mixer.read(buf);
                }),
                None => {
                    mixer.read(mixed);
                }
            }

            for (out, frame) in out
                .chunks_mut(self.device_channels)
                .zip(mixed.chunks(self.engine_channels))
            {
                for (ch, sample) in out.iter_mut().enumerate() {
                    let value = (frame[ch % self.engine_channels] * volume).clamp(-1.0, 1.0);
                    *sample = T::from_sample(value);
                }
            }
        }
    }
}

/// Build the data callback for device sample type `T`
fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    mut renderer: Renderer,
    failed: Arc<AtomicBool>,
) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| renderer.render(data),
            move |err| {
                error!("Audio stream error: {}", err);
                failed.store(true, Ordering::SeqCst);
            },
            None,
        )
        .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))
}
