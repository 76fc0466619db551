//! Fade curve implementations for crossfading
//!
//! Provides the gain laws used by the cue queue when two cues overlap,
//! and by the silence gate and music channel for single-sided fades.
//!
//! The default crossfade law is equal-power:
//!
//! ```text
//! gain_out = sqrt(1 - p)
//! gain_in  = sqrt(p)
//! gain_out² + gain_in² = 1   for every p in [0, 1]
//! ```
//!
//! A linear crossfade dips by ~3 dB at the midpoint; equal-power keeps the
//! summed energy constant.

use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

/// Fade curve types
///
/// - Linear: Constant rate of change (precise, predictable)
/// - SCurve: Smooth acceleration and deceleration
/// - EqualPower: Constant perceived loudness during crossfade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FadeCurve {
    /// Linear: v(t) = t
    Linear,

    /// S-Curve: v(t) = 0.5 × (1 - cos(π × t))
    SCurve,

    /// Equal-Power: v(t) = sqrt(t)
    EqualPower,
}

impl FadeCurve {
    /// Calculate fade-in multiplier at given position
    ///
    /// # Arguments
    /// * `position` - Normalized position through fade (0.0 to 1.0)
    ///
    /// # Returns
    /// Volume multiplier to apply to sample (0.0 = silence, 1.0 = full volume)
    pub fn calculate_fade_in(&self, position: f32) -> f32 {
        let t = position.clamp(0.0, 1.0);

        match self {
            FadeCurve::Linear => t,
            FadeCurve::SCurve => 0.5 * (1.0 - (PI * t).cos()),
            FadeCurve::EqualPower => t.sqrt(),
        }
    }

    /// Calculate fade-out multiplier at given position
    ///
    /// Mirror of [`calculate_fade_in`](Self::calculate_fade_in): 1.0 at the
    /// start of the fade, 0.0 at the end.
    pub fn calculate_fade_out(&self, position: f32) -> f32 {
        let t = position.clamp(0.0, 1.0);

        match self {
            FadeCurve::Linear => 1.0 - t,
            FadeCurve::SCurve => 0.5 * (1.0 + (PI * t).cos()),
            FadeCurve::EqualPower => (1.0 - t).sqrt(),
        }
    }

    /// Gains for an outgoing and incoming signal at crossfade progress `p`
    ///
    /// Returns `(gain_out, gain_in)`.
    #[inline]
    pub fn crossfade_gains(&self, progress: f32) -> (f32, f32) {
        (
            self.calculate_fade_out(progress),
            self.calculate_fade_in(progress),
        )
    }

    /// Parse curve from a configuration string
    ///
    /// Accepts:
    /// - 'linear'
    /// - 'cosine', 's_curve', 'scurve', 's-curve' (SCurve)
    /// - 'equal_power', 'equalpower', 'equal-power'
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "linear" => Some(FadeCurve::Linear),
            "cosine" | "scurve" | "s-curve" | "s_curve" => Some(FadeCurve::SCurve),
            "equal_power" | "equalpower" | "equal-power" => Some(FadeCurve::EqualPower),
            _ => None,
        }
    }

    /// Get human-readable display name
    pub fn display_name(&self) -> &'static str {
        match self {
            FadeCurve::Linear => "Linear",
            FadeCurve::SCurve => "S-Curve",
            FadeCurve::EqualPower => "Equal Power",
        }
    }

    pub fn all_variants() -> &'static [FadeCurve] {
        &[FadeCurve::Linear, FadeCurve::SCurve, FadeCurve::EqualPower]
    }
}

impl Default for FadeCurve {
    fn default() -> Self {
        FadeCurve::EqualPower
    }
}

impl std::fmt::Display for FadeCurve {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Convert a dBFS level to linear amplitude (`10^(dB/20)`)
#[inline]
pub fn db_to_amplitude(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}
