//! Entrainment configuration
//!
//! Immutable for the lifetime of a controller. Durations travel as milliseconds
//! on the wire (`*_ms` fields) and as [`Duration`] in Rust.

use crate::error::EntrainError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Thresholds, pacing and timing for one controller instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntrainmentConfig {
    /// Multiplier on baseline HR (1.5 => trigger at 150% of baseline)
    pub hr_spike_threshold: f64,
    /// Fractional drop below baseline HRV (0.2 => trigger at 80% of baseline)
    pub hrv_drop_threshold: f64,
    /// Haptic pulses per minute
    pub target_cadence_bpm: f64,
    /// Fraction of each pulse cycle the actuator is on
    pub duty_cycle: f64,
    #[serde(rename = "max_session_duration_ms", with = "duration_ms")]
    pub max_session_duration: Duration,
    #[serde(rename = "min_recovery_time_ms", with = "duration_ms")]
    pub min_recovery_time: Duration,
    #[serde(rename = "debounce_window_ms", with = "duration_ms")]
    pub debounce_window: Duration,
    /// Time span of samples retained for the baseline
    #[serde(rename = "baseline_window_ms", with = "duration_ms")]
    pub baseline_window: Duration,
    /// No trigger evaluation happens below this many retained samples
    pub min_samples_for_baseline: usize,
}

impl Default for EntrainmentConfig {
    fn default() -> Self {
        Self {
            hr_spike_threshold: 1.5,
            hrv_drop_threshold: 0.2,
            target_cadence_bpm: 6.0,
            duty_cycle: 0.5,
            max_session_duration: Duration::from_secs(10 * 60),
            min_recovery_time: Duration::from_secs(60),
            debounce_window: Duration::from_secs(5 * 60),
            baseline_window: Duration::from_secs(5 * 60),
            min_samples_for_baseline: 10,
        }
    }
}

impl EntrainmentConfig {
    /// Reject settings that would make trigger or pulse behavior undefined
    pub fn validate(&self) -> Result<(), EntrainError> {
        if self.min_samples_for_baseline == 0 {
            return Err(invalid("min_samples_for_baseline must be at least 1"));
        }
        if !self.hr_spike_threshold.is_finite() || self.hr_spike_threshold <= 0.0 {
            return Err(invalid(format!(
                "hr_spike_threshold must be a positive number, got {}",
                self.hr_spike_threshold
            )));
        }
        if !(self.hrv_drop_threshold > 0.0 && self.hrv_drop_threshold < 1.0) {
            return Err(invalid(format!(
                "hrv_drop_threshold must be in (0, 1), got {}",
                self.hrv_drop_threshold
            )));
        }
        if !self.target_cadence_bpm.is_finite() || self.target_cadence_bpm <= 0.0 {
            return Err(invalid(format!(
                "target_cadence_bpm must be a positive number, got {}",
                self.target_cadence_bpm
            )));
        }
        if !(self.duty_cycle > 0.0 && self.duty_cycle < 1.0) {
            return Err(invalid(format!(
                "duty_cycle must be in (0, 1), got {}",
                self.duty_cycle
            )));
        }
        for (name, value) in [
            ("max_session_duration", self.max_session_duration),
            ("min_recovery_time", self.min_recovery_time),
            ("baseline_window", self.baseline_window),
        ] {
            if value.is_zero() {
                return Err(invalid(format!("{name} must be greater than zero")));
            }
        }
        Ok(())
    }

    /// Load configuration from JSON, validating it
    pub fn from_json(json: &str) -> Result<Self, EntrainError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to pretty JSON
    pub fn to_json(&self) -> Result<String, EntrainError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn invalid(msg: impl Into<String>) -> EntrainError {
    EntrainError::InvalidConfig(msg.into())
}

/// Serde adapter storing a [`Duration`] as whole milliseconds
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
