//! The live binding of mixer to device

use serde::Serialize;
use showdeck_common::events::{OutputTier, Timestamp};
use std::fmt;
use std::time::Duration;

/// Result of a successful flow verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FlowReport {
    /// Time from play until the mixer was first read
    pub first_read_after: Duration,
    /// Sustained checks that saw the read position advance
    pub successes: u32,
    pub checks: u32,
}

/// Description of the active output
///
/// Only created after the stream passed flow verification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputSession {
    pub tier: OutputTier,
    /// Backend name (host API)
    pub backend: String,
    /// Device id in use (None = system default)
    pub device_id: Option<String>,
    pub device_name: String,
    pub flow: FlowReport,
    pub established_at: Timestamp,
}

impl OutputSession {
    /// Whether this session follows the OS default device
    pub fn follows_default(&self) -> bool {
        self.device_id.is_none()
    }
}

impl fmt::Display for OutputSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} via {} ({} backend, {}/{} flow checks)",
            self.device_name, self.backend, self.tier, self.flow.successes, self.flow.checks
        )
    }
}
