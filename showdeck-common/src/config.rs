//! Engine configuration loading
//!
//! The audio engine is configured once, at construction, from a single
//! immutable [`EngineConfig`] value. Nothing in the engine reads ambient
//! process-wide flags after that point.
//!
//! # Resolution Order
//!
//! 1. Explicit path (command-line `--config`)
//! 2. `SHOWDECK_CONFIG` environment variable
//! 3. `<config_dir>/showdeck/audio.toml`
//! 4. Built-in defaults (code constants)
//!
//! A missing file at step 3 is not an error. A file that exists but does
//! not parse is.

use crate::fade_curves::FadeCurve;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV_VAR: &str = "SHOWDECK_CONFIG";

/// Complete engine configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fixed sample format of the mixer graph
    pub format: FormatConfig,

    /// Persisted output device id (None = system default)
    pub output_device: Option<String>,

    pub queue: QueueConfig,
    pub silence: SilenceConfig,
    pub output: OutputConfig,
    pub verification: VerificationConfig,
    pub health: HealthConfig,
    pub music: MusicConfig,
    pub logging: LoggingConfig,

    /// Verbose diagnostics (per-poll verification traces, per-tick health traces)
    pub debug: bool,
}

/// Mixer sample format
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct FormatConfig {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Cue queue behavior
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of normal-priority cues waiting behind current/next
    pub limit: usize,

    /// Crossfade window between consecutive cues
    pub crossfade_ms: u64,

    /// Gain law applied during crossfades
    pub crossfade_curve: FadeCurve,

    /// Wrap every cue in a silence gate so silent tails end early
    pub trim_silence: bool,
}

/// Silence gate thresholds
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct SilenceConfig {
    /// Peak amplitude below this level counts as silence
    pub threshold_db: f32,

    /// Cumulative silence required before the gate fades out
    pub duration_ms: u64,

    /// Length of the linear fade performed once silence is confirmed
    pub fade_ms: u64,
}

/// Output backend tuning
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Fixed buffer size for the low-latency backend (None = device default)
    pub primary_buffer_frames: Option<u32>,

    /// Fixed buffer size for the compatibility backend (None = device default)
    pub compatibility_buffer_frames: Option<u32>,

    /// Initial master volume, 0.0-1.0
    pub master_volume: f32,
}

/// Empirical flow verification thresholds
///
/// These are heuristics. The defaults reproduce the behavior the engine
/// shipped with; none of them is load-bearing on its own.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Phase A: how long to wait for the first read after starting a stream
    pub initial_window_ms: u64,

    /// Phase A poll increment
    pub initial_poll_ms: u64,

    /// Phase B: number of sustained-flow checks
    pub sustained_checks: u32,

    /// Phase B: interval between checks
    pub sustained_interval_ms: u64,

    /// Phase B: checks that must observe an advancing read position
    pub sustained_required: u32,
}

/// Background health monitoring
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub interval_ms: u64,

    /// How long the mixer may go unread before a stall is considered
    pub stall_grace_ms: u64,
}

/// Music channel behavior
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct MusicConfig {
    /// Discrete volume steps used by a timed fade-out
    pub fade_steps: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            format: FormatConfig::default(),
            output_device: None,
            queue: QueueConfig::default(),
            silence: SilenceConfig::default(),
            output: OutputConfig::default(),
            verification: VerificationConfig::default(),
            health: HealthConfig::default(),
            music: MusicConfig::default(),
            logging: LoggingConfig::default(),
            debug: false,
        }
    }
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            limit: 10,
            crossfade_ms: 2000,
            crossfade_curve: FadeCurve::EqualPower,
            trim_silence: true,
        }
    }
}

impl Default for SilenceConfig {
    fn default() -> Self {
        Self {
            threshold_db: -50.0,
            duration_ms: 1500,
            fade_ms: 150,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            primary_buffer_frames: Some(512),
            compatibility_buffer_frames: None,
            master_volume: 1.0,
        }
    }
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            initial_window_ms: 500,
            initial_poll_ms: 10,
            sustained_checks: 10,
            sustained_interval_ms: 100,
            sustained_required: 8,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5000,
            stall_grace_ms: 10_000,
        }
    }
}

impl Default for MusicConfig {
    fn default() -> Self {
        Self { fade_steps: 20 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl VerificationConfig {
    pub fn initial_window(&self) -> Duration {
        Duration::from_millis(self.initial_window_ms)
    }

    pub fn initial_poll(&self) -> Duration {
        Duration::from_millis(self.initial_poll_ms.max(1))
    }

    pub fn sustained_interval(&self) -> Duration {
        Duration::from_millis(self.sustained_interval_ms)
    }

    /// Upper bound on how long one verification may block its caller
    pub fn worst_case(&self) -> Duration {
        self.initial_window() + self.sustained_interval() * self.sustained_checks
    }
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn stall_grace(&self) -> Duration {
        Duration::from_millis(self.stall_grace_ms)
    }
}

impl EngineConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(text)?;
        config.validate()
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading engine configuration from {}", path.display());
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Resolve and load configuration using the documented priority order
    ///
    /// # Arguments
    /// * `cli_path` - Path given on the command line, if any
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        // Priority 1: Command-line argument
        if let Some(path) = cli_path {
            info!("Using configuration file {}", path.display());
            return Self::from_file(path);
        }

        // Priority 2: Environment variable
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            info!("Using configuration file {} (from {})", path, CONFIG_ENV_VAR);
            return Self::from_file(Path::new(&path));
        }

        // Priority 3: Per-user config file, only if present
        if let Some(path) = default_config_path() {
            if path.exists() {
                info!("Using configuration file {}", path.display());
                return Self::from_file(&path);
            }
        }

        // Priority 4: Built-in defaults
        info!("No configuration file found, using built-in defaults");
        Self::default().validate()
    }

    /// Check invariants and clamp ranged values
    pub fn validate(mut self) -> Result<Self> {
        if self.format.sample_rate == 0 {
            return Err(Error::Config("format.sample_rate must be non-zero".to_string()));
        }
        if self.format.channels == 0 {
            return Err(Error::Config("format.channels must be non-zero".to_string()));
        }
        if self.verification.sustained_checks == 0 {
            return Err(Error::Config(
                "verification.sustained_checks must be non-zero".to_string(),
            ));
        }
        if self.verification.sustained_required > self.verification.sustained_checks {
            return Err(Error::Config(format!(
                "verification.sustained_required ({}) exceeds sustained_checks ({})",
                self.verification.sustained_required, self.verification.sustained_checks
            )));
        }
        if self.music.fade_steps == 0 {
            return Err(Error::Config("music.fade_steps must be non-zero".to_string()));
        }
        if self.silence.threshold_db > 0.0 {
            return Err(Error::Config(format!(
                "silence.threshold_db must be <= 0 dBFS, got {}",
                self.silence.threshold_db
            )));
        }

        self.output.master_volume = self.output.master_volume.clamp(0.0, 1.0);
        Ok(self)
    }

    /// Convert milliseconds to an interleaved sample count at the configured format
    pub fn ms_to_samples(&self, ms: u64) -> u64 {
        ms * self.format.sample_rate as u64 / 1000 * self.format.channels as u64
    }
}

/// Get the per-user configuration file path for the platform
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("showdeck").join("audio.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default().validate().unwrap();
        assert_eq!(config.format.sample_rate, 44100);
        assert_eq!(config.format.channels, 2);
        assert_eq!(config.queue.limit, 10);
        assert_eq!(config.verification.sustained_required, 8);
        assert_eq!(config.health.stall_grace(), Duration::from_secs(10));
        assert!(!config.debug);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            output_device = "USB DAC"
            debug = true

            [queue]
            limit = 4
            crossfade_curve = "linear"

            [verification]
            initial_window_ms = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.output_device.as_deref(), Some("USB DAC"));
        assert!(config.debug);
        assert_eq!(config.queue.limit, 4);
        assert_eq!(config.queue.crossfade_curve, FadeCurve::Linear);
        assert_eq!(config.queue.crossfade_ms, 2000);
        assert_eq!(config.verification.initial_window_ms, 50);
        assert_eq!(config.verification.sustained_checks, 10);
        assert_eq!(config.silence.threshold_db, -50.0);
    }

    #[test]
    fn test_master_volume_clamped() {
        let config = EngineConfig::from_toml_str("[output]\nmaster_volume = 1.7\n").unwrap();
        assert_eq!(config.output.master_volume, 1.0);
    }

    #[test]
    fn test_rejects_impossible_pass_bar() {
        let result = EngineConfig::from_toml_str(
            "[verification]\nsustained_checks = 5\nsustained_required = 6\n",
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_malformed_toml() {
        let result = EngineConfig::from_toml_str("[queue\nlimit = 3");
        assert!(matches!(result, Err(Error::Toml(_))));
    }

    #[test]
    fn test_ms_to_samples() {
        let config = EngineConfig::default();
        assert_eq!(config.ms_to_samples(1000), 88_200);
        assert_eq!(config.ms_to_samples(10), 882);
    }

    #[test]
    fn test_worst_case_verification_time() {
        let v = VerificationConfig::default();
        assert_eq!(v.worst_case(), Duration::from_millis(1500));
    }

    #[test]
    #[serial]
    fn test_load_prefers_cli_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[health]\ninterval_ms = 250").unwrap();

        let config = EngineConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.health.interval_ms, 250);
    }

    #[test]
    #[serial]
    fn test_load_from_env_var() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[music]\nfade_steps = 5").unwrap();

        std::env::set_var(CONFIG_ENV_VAR, file.path());
        let config = EngineConfig::load(None);
        std::env::remove_var(CONFIG_ENV_VAR);

        assert_eq!(config.unwrap().music.fade_steps, 5);
    }
}
