//! Baseline tracking
//!
//! This module keeps a rolling, time-bounded window of recent samples and derives
//! the personal resting HR/HRV reference used by trigger and recovery detection.

use crate::types::{AnxietySample, Baseline};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// Rolling window of samples bounded by age
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineTracker {
    samples: VecDeque<AnxietySample>,
    /// Maximum age of a retained sample, relative to the newest one
    #[serde(rename = "window_ms", with = "crate::config::duration_ms")]
    window: Duration,
    /// Samples required before a baseline is reported
    min_samples: usize,
}

impl BaselineTracker {
    /// Create a tracker retaining `window` worth of samples
    pub fn new(window: Duration, min_samples: usize) -> Self {
        Self {
            samples: VecDeque::new(),
            window,
            min_samples,
        }
    }

    /// Append a sample and evict everything older than the window
    pub fn ingest(&mut self, sample: AnxietySample) {
        self.samples.push_back(sample);

        let window = chrono::Duration::from_std(self.window).unwrap_or(chrono::Duration::MAX);
        let Some(cutoff) = sample.timestamp.checked_sub_signed(window) else {
            return;
        };
        while let Some(oldest) = self.samples.front() {
            if oldest.timestamp < cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Mean HR/HRV over the window, or `None` until enough samples are retained
    pub fn current_baseline(&self) -> Option<Baseline> {
        if self.samples.len() < self.min_samples.max(1) {
            return None;
        }
        let count = self.samples.len() as f64;
        let hr_sum: f64 = self.samples.iter().map(|s| f64::from(s.hr)).sum();
        let hrv_sum: f64 = self.samples.iter().map(|s| s.hrv).sum();

        Some(Baseline {
            hr: hr_sum / count,
            hrv: hrv_sum / count,
            sample_count: self.samples.len(),
        })
    }

    /// Apply new window limits, evicting against the newest retained sample
    pub fn set_limits(&mut self, window: Duration, min_samples: usize) {
        self.window = window;
        self.min_samples = min_samples;
        if let Some(newest) = self.samples.pop_back() {
            self.ingest(newest);
        }
    }

    /// Number of samples currently retained
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn is_ready(&self) -> bool {
        self.samples.len() >= self.min_samples.max(1)
    }

    /// Load tracker state from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize tracker state to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap()
    }

    fn sample_at(secs: i64, hr: u32, hrv: f64) -> AnxietySample {
        AnxietySample::new(t0() + chrono::Duration::seconds(secs), hr, hrv)
    }

    #[test]
    fn test_not_ready_below_min_samples() {
        let mut tracker = BaselineTracker::new(Duration::from_secs(300), 5);
        for i in 0..4 {
            tracker.ingest(sample_at(i, 200, 5.0));
        }
        assert!(tracker.current_baseline().is_none());
        assert!(!tracker.is_ready());

        tracker.ingest(sample_at(4, 200, 5.0));
        assert!(tracker.current_baseline().is_some());
    }

    #[test]
    fn test_constant_signal_converges_exactly() {
        let mut tracker = BaselineTracker::new(Duration::from_secs(60), 3);
        for i in 0..200 {
            tracker.ingest(sample_at(i, 70, 50.0));
            if let Some(baseline) = tracker.current_baseline() {
                assert_eq!(baseline.hr, 70.0);
                assert_eq!(baseline.hrv, 50.0);
            }
        }
        assert!(tracker.current_baseline().is_some());
    }

    #[test]
    fn test_mean_over_window() {
        let mut tracker = BaselineTracker::new(Duration::from_secs(300), 3);
        tracker.ingest(sample_at(0, 60, 40.0));
        tracker.ingest(sample_at(1, 70, 50.0));
        tracker.ingest(sample_at(2, 80, 60.0));

        let baseline = tracker.current_baseline().unwrap();
        assert!((baseline.hr - 70.0).abs() < 1e-9);
        assert!((baseline.hrv - 50.0).abs() < 1e-9);
        assert_eq!(baseline.sample_count, 3);
    }

    #[test]
    fn test_old_samples_evicted() {
        let mut tracker = BaselineTracker::new(Duration::from_secs(10), 1);
        tracker.ingest(sample_at(0, 100, 20.0));
        tracker.ingest(sample_at(5, 100, 20.0));
        tracker.ingest(sample_at(20, 60, 60.0));

        // Only the sample at t=20 is within 10s of the newest
        assert_eq!(tracker.sample_count(), 1);
        let baseline = tracker.current_baseline().unwrap();
        assert_eq!(baseline.hr, 60.0);
    }

    #[test]
    fn test_window_boundary_is_inclusive() {
        let mut tracker = BaselineTracker::new(Duration::from_secs(10), 1);
        tracker.ingest(sample_at(0, 60, 50.0));
        tracker.ingest(sample_at(10, 80, 50.0));
        assert_eq!(tracker.sample_count(), 2);
    }

    #[test]
    fn test_memory_bounded_on_long_feed() {
        let mut tracker = BaselineTracker::new(Duration::from_secs(30), 1);
        for i in 0..10_000 {
            tracker.ingest(sample_at(i, 70, 50.0));
        }
        assert_eq!(tracker.sample_count(), 31);
    }

    #[test]
    fn test_set_limits_evicts() {
        let mut tracker = BaselineTracker::new(Duration::from_secs(300), 2);
        for i in 0..10 {
            tracker.ingest(sample_at(i * 10, 70, 50.0));
        }
        assert_eq!(tracker.sample_count(), 10);

        tracker.set_limits(Duration::from_secs(30), 5);
        assert_eq!(tracker.sample_count(), 4);
        assert!(tracker.current_baseline().is_none());
    }

    #[test]
    fn test_serialization() {
        let mut tracker = BaselineTracker::new(Duration::from_secs(300), 2);
        tracker.ingest(sample_at(0, 65, 55.0));
        tracker.ingest(sample_at(1, 75, 45.0));

        let json = tracker.to_json().unwrap();
        let loaded = BaselineTracker::from_json(&json).unwrap();

        assert_eq!(tracker.current_baseline(), loaded.current_baseline());
    }
}
