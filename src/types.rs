//! Core types for the entrainment controller
//!
//! Samples flow in, events and episodes flow out. Everything here is plain data;
//! state lives in the tracker, detectors and session controller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// One physiological reading from the wearable
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnxietySample {
    /// When the reading was taken (UTC)
    pub timestamp: DateTime<Utc>,
    /// Heart rate (bpm)
    pub hr: u32,
    /// Heart rate variability (ms, RMSSD)
    pub hrv: f64,
}

impl AnxietySample {
    pub fn new(timestamp: DateTime<Utc>, hr: u32, hrv: f64) -> Self {
        Self { timestamp, hr, hrv }
    }
}

/// Personal resting reference computed over the baseline window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    /// Mean heart rate (bpm)
    pub hr: f64,
    /// Mean heart rate variability (ms)
    pub hrv: f64,
    /// Number of samples the means were computed over
    pub sample_count: usize,
}

/// Why an episode was opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    HrSpike,
    HrvDrop,
    HrHrvCombined,
}

impl TriggerReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerReason::HrSpike => "hr_spike",
            TriggerReason::HrvDrop => "hrv_drop",
            TriggerReason::HrHrvCombined => "hr_hrv_combined",
        }
    }
}

/// Why an episode was cut short
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    MaxDuration,
}

/// Lifecycle event published to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntrainmentEvent {
    Triggered {
        at: DateTime<Utc>,
        reason: TriggerReason,
        hr_value: u32,
        hrv_value: f64,
    },
    Recovered {
        at: DateTime<Utc>,
        #[serde(with = "crate::config::duration_ms")]
        stabilized_for: Duration,
        #[serde(with = "crate::config::duration_ms")]
        session_duration: Duration,
    },
    Aborted {
        at: DateTime<Utc>,
        reason: AbortReason,
        #[serde(with = "crate::config::duration_ms")]
        session_duration: Duration,
    },
}

impl EntrainmentEvent {
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            EntrainmentEvent::Triggered { at, .. }
            | EntrainmentEvent::Recovered { at, .. }
            | EntrainmentEvent::Aborted { at, .. } => *at,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, EntrainmentEvent::Triggered { .. })
    }
}

/// How an episode ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeOutcome {
    Recovered,
    Aborted,
}

/// Completed trigger-to-resolution record handed to the episode sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnxietyEpisode {
    pub id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(with = "crate::config::duration_ms")]
    pub duration: Duration,
    /// Highest heart rate seen during the episode (bpm)
    pub max_hr: u32,
    /// Lowest HRV seen during the episode (ms)
    pub min_hrv: f64,
    /// Pulse cadence used (pulses per minute)
    pub cadence_bpm: f64,
    pub reason: TriggerReason,
    pub outcome: EpisodeOutcome,
}

/// Session controller state machine position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Triggered,
    Recovered,
    Aborted,
}

/// What the controller knows about its sample feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum FeedStatus {
    /// No feed attached
    Idle,
    Live,
    /// Feed finished; the host should call `stop()`
    Ended,
    /// Feed reported an error; the host should call `stop()`
    Failed(String),
}

/// Pulse counters for the current run of the controller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PulseStats {
    /// Pulses that completed successfully
    pub pulses: u64,
    /// Pulses the actuator reported as failed
    pub failures: u64,
}

/// Snapshot published on the controller's status channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerStatus {
    pub running: bool,
    pub state: SessionState,
    pub feed: FeedStatus,
    /// Latest baseline, once enough samples are retained
    pub baseline: Option<Baseline>,
    /// Actuator diagnostics; failures here never end a session
    #[serde(default)]
    pub pulses: PulseStats,
}

impl Default for ControllerStatus {
    fn default() -> Self {
        Self {
            running: false,
            state: SessionState::Idle,
            feed: FeedStatus::Idle,
            baseline: None,
            pulses: PulseStats::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_event_serialization_tags() {
        let event = EntrainmentEvent::Triggered {
            at: Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap(),
            reason: TriggerReason::HrHrvCombined,
            hr_value: 110,
            hrv_value: 35.0,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "triggered");
        assert_eq!(json["reason"], "hr_hrv_combined");
        assert_eq!(json["hr_value"], 110);
    }

    #[test]
    fn test_duration_fields_in_millis() {
        let event = EntrainmentEvent::Recovered {
            at: Utc.with_ymd_and_hms(2024, 1, 15, 14, 5, 0).unwrap(),
            stabilized_for: Duration::from_secs(60),
            session_duration: Duration::from_millis(300_500),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["stabilized_for"], 60_000);
        assert_eq!(json["session_duration"], 300_500);

        let back: EntrainmentEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
        assert!(back.is_terminal());
    }

    #[test]
    fn test_sample_from_json() {
        let json = r#"{"timestamp":"2024-01-15T14:00:00Z","hr":72,"hrv":48.5}"#;
        let sample: AnxietySample = serde_json::from_str(json).unwrap();
        assert_eq!(sample.hr, 72);
        assert!((sample.hrv - 48.5).abs() < f64::EPSILON);
    }
}
