//! Trigger detection
//!
//! Classification is a pure function of sample, baseline and thresholds. The
//! detector adds a debounce clock on top, keyed to the timestamp of the last
//! accepted trigger.

use crate::config::EntrainmentConfig;
use crate::types::{AnxietySample, Baseline, TriggerReason};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Thresholds used for per-sample classification
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerThresholds {
    pub hr_spike: f64,
    pub hrv_drop: f64,
}

impl TriggerThresholds {
    pub fn from_config(config: &EntrainmentConfig) -> Self {
        Self {
            hr_spike: config.hr_spike_threshold,
            hrv_drop: config.hrv_drop_threshold,
        }
    }

    /// Classify a sample against a baseline. Both comparisons are inclusive.
    pub fn classify(&self, sample: &AnxietySample, baseline: &Baseline) -> Option<TriggerReason> {
        let hr_spike = f64::from(sample.hr) >= baseline.hr * self.hr_spike;
        let hrv_drop = sample.hrv <= baseline.hrv * (1.0 - self.hrv_drop);

        match (hr_spike, hrv_drop) {
            (true, true) => Some(TriggerReason::HrHrvCombined),
            (true, false) => Some(TriggerReason::HrSpike),
            (false, true) => Some(TriggerReason::HrvDrop),
            (false, false) => None,
        }
    }

    /// Whether either anxious condition holds, ignoring debounce
    pub fn is_anxious(&self, sample: &AnxietySample, baseline: &Baseline) -> bool {
        self.classify(sample, baseline).is_some()
    }
}

/// Accepted trigger
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trigger {
    pub at: DateTime<Utc>,
    pub reason: TriggerReason,
    /// Baseline the sample was judged against
    pub baseline: Baseline,
}

/// Debounced trigger detector
#[derive(Debug, Clone)]
pub struct TriggerDetector {
    thresholds: TriggerThresholds,
    debounce_window: Duration,
    last_accepted: Option<DateTime<Utc>>,
}

impl TriggerDetector {
    pub fn new(thresholds: TriggerThresholds, debounce_window: Duration) -> Self {
        Self {
            thresholds,
            debounce_window,
            last_accepted: None,
        }
    }

    pub fn from_config(config: &EntrainmentConfig) -> Self {
        Self::new(TriggerThresholds::from_config(config), config.debounce_window)
    }

    pub fn thresholds(&self) -> &TriggerThresholds {
        &self.thresholds
    }

    /// Timestamp of the last accepted trigger, if any
    pub fn last_accepted(&self) -> Option<DateTime<Utc>> {
        self.last_accepted
    }

    /// Evaluate a sample, accepting a trigger unless debounced or the baseline is missing
    pub fn evaluate(
        &mut self,
        sample: &AnxietySample,
        baseline: Option<&Baseline>,
    ) -> Option<Trigger> {
        let baseline = baseline?;
        let reason = self.thresholds.classify(sample, baseline)?;

        if self.is_debounced(sample.timestamp) {
            tracing::debug!(
                reason = reason.as_str(),
                hr = sample.hr,
                hrv = sample.hrv,
                "Trigger suppressed by debounce"
            );
            return None;
        }

        self.last_accepted = Some(sample.timestamp);
        Some(Trigger {
            at: sample.timestamp,
            reason,
            baseline: *baseline,
        })
    }

    fn is_debounced(&self, at: DateTime<Utc>) -> bool {
        let Some(last) = self.last_accepted else {
            return false;
        };
        match (at - last).to_std() {
            Ok(elapsed) => elapsed < self.debounce_window,
            // Sample older than the last trigger
            Err(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap()
    }

    fn sample_at(secs: i64, hr: u32, hrv: f64) -> AnxietySample {
        AnxietySample::new(t0() + chrono::Duration::seconds(secs), hr, hrv)
    }

    fn baseline() -> Baseline {
        Baseline {
            hr: 70.0,
            hrv: 50.0,
            sample_count: 10,
        }
    }

    fn thresholds() -> TriggerThresholds {
        TriggerThresholds {
            hr_spike: 1.5,
            hrv_drop: 0.2,
        }
    }

    #[test]
    fn test_classification() {
        let t = thresholds();
        let b = baseline();

        assert_eq!(t.classify(&sample_at(0, 72, 49.0), &b), None);
        assert_eq!(
            t.classify(&sample_at(0, 110, 49.0), &b),
            Some(TriggerReason::HrSpike)
        );
        assert_eq!(
            t.classify(&sample_at(0, 72, 30.0), &b),
            Some(TriggerReason::HrvDrop)
        );
        assert_eq!(
            t.classify(&sample_at(0, 110, 30.0), &b),
            Some(TriggerReason::HrHrvCombined)
        );
    }

    #[test]
    fn test_hrv_drop_only_when_hr_below_spike() {
        // 95 < 70 * 1.5 = 105, while 35 <= 50 * 0.8 = 40
        let reason = thresholds().classify(&sample_at(0, 95, 35.0), &baseline());
        assert_eq!(reason, Some(TriggerReason::HrvDrop));
    }

    #[test]
    fn test_boundaries_inclusive() {
        let t = thresholds();
        let b = baseline();

        assert_eq!(
            t.classify(&sample_at(0, 105, 40.0), &b),
            Some(TriggerReason::HrHrvCombined)
        );
        assert_eq!(
            t.classify(&sample_at(0, 105, 40.1), &b),
            Some(TriggerReason::HrSpike)
        );
        assert_eq!(t.classify(&sample_at(0, 104, 40.1), &b), None);
    }

    #[test]
    fn test_no_trigger_without_baseline() {
        let mut detector = TriggerDetector::new(thresholds(), Duration::from_secs(60));
        assert!(detector.evaluate(&sample_at(0, 250, 1.0), None).is_none());
        assert!(detector.last_accepted().is_none());
    }

    #[test]
    fn test_debounce_suppresses_burst() {
        let mut detector = TriggerDetector::new(thresholds(), Duration::from_secs(60));
        let b = baseline();

        let accepted: Vec<_> = (0..30)
            .filter_map(|i| detector.evaluate(&sample_at(i, 120, 30.0), Some(&b)))
            .collect();
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].at, t0());

        // Exactly one window later a new trigger is accepted
        let again = detector.evaluate(&sample_at(60, 120, 30.0), Some(&b));
        assert!(again.is_some());
    }

    #[test]
    fn test_debounce_measured_from_acceptance() {
        let mut detector = TriggerDetector::new(thresholds(), Duration::from_secs(60));
        let b = baseline();

        assert!(detector.evaluate(&sample_at(0, 120, 30.0), Some(&b)).is_some());
        // Suppressed samples do not move the debounce clock
        assert!(detector.evaluate(&sample_at(50, 120, 30.0), Some(&b)).is_none());
        assert!(detector.evaluate(&sample_at(61, 120, 30.0), Some(&b)).is_some());
        assert_eq!(detector.last_accepted(), Some(t0() + chrono::Duration::seconds(61)));
    }

    #[test]
    fn test_normal_sample_does_not_touch_debounce() {
        let mut detector = TriggerDetector::new(thresholds(), Duration::from_secs(60));
        assert!(detector
            .evaluate(&sample_at(0, 70, 50.0), Some(&baseline()))
            .is_none());
        assert!(detector.last_accepted().is_none());
    }
}
