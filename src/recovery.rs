//! Recovery detection
//!
//! Accumulates contiguous normal time after a trigger. Any anxious sample resets
//! progress to zero; recovery is declared once per episode.

use chrono::{DateTime, Utc};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RecoveryDetector {
    min_recovery_time: Duration,
    /// Timestamp of the first normal sample in the current run
    normal_since: Option<DateTime<Utc>>,
    declared: bool,
}

impl RecoveryDetector {
    pub fn new(min_recovery_time: Duration) -> Self {
        Self {
            min_recovery_time,
            normal_since: None,
            declared: false,
        }
    }

    /// Start tracking a new episode
    pub fn reset(&mut self) {
        self.normal_since = None;
        self.declared = false;
    }

    /// Feed one classified sample. Returns the stabilized duration the first
    /// time it reaches the minimum recovery time, `None` otherwise.
    pub fn observe(&mut self, at: DateTime<Utc>, anxious: bool) -> Option<Duration> {
        if self.declared {
            return None;
        }
        if anxious {
            if self.normal_since.take().is_some() {
                tracing::debug!("Recovery progress reset by anxious sample");
            }
            return None;
        }

        let since = *self.normal_since.get_or_insert(at);
        let stabilized = (at - since).to_std().unwrap_or(Duration::ZERO);
        if stabilized >= self.min_recovery_time {
            self.declared = true;
            return Some(stabilized);
        }
        None
    }

    /// Normal time accumulated as of `at`
    pub fn progress(&self, at: DateTime<Utc>) -> Duration {
        self.normal_since
            .and_then(|since| (at - since).to_std().ok())
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_declared(&self) -> bool {
        self.declared
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    #[test]
    fn test_declared_after_min_time() {
        let mut detector = RecoveryDetector::new(Duration::from_secs(4));
        assert_eq!(detector.observe(at(1), false), None);
        assert_eq!(detector.observe(at(2), false), None);
        assert_eq!(detector.observe(at(3), false), None);
        assert_eq!(detector.observe(at(4), false), None);
        assert_eq!(detector.observe(at(5), false), Some(Duration::from_secs(4)));
        assert!(detector.is_declared());
    }

    #[test]
    fn test_declared_exactly_once() {
        let mut detector = RecoveryDetector::new(Duration::from_secs(2));
        let declared: Vec<_> = (0..10)
            .filter_map(|i| detector.observe(at(i), false))
            .collect();
        assert_eq!(declared, vec![Duration::from_secs(2)]);
    }

    #[test]
    fn test_anxious_sample_resets_progress() {
        let mut detector = RecoveryDetector::new(Duration::from_secs(10));
        for i in 0..9 {
            assert_eq!(detector.observe(at(i), false), None);
        }
        assert_eq!(detector.progress(at(8)), Duration::from_secs(8));

        assert_eq!(detector.observe(at(9), true), None);
        assert_eq!(detector.progress(at(9)), Duration::ZERO);

        // Progress restarts from the next normal sample
        for i in 10..20 {
            assert_eq!(detector.observe(at(i), false), None);
        }
        assert_eq!(detector.observe(at(20), false), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_oscillating_signal_never_recovers() {
        let mut detector = RecoveryDetector::new(Duration::from_secs(5));
        for i in 0..100 {
            assert_eq!(detector.observe(at(i), i % 4 == 3), None);
        }
    }

    #[test]
    fn test_reset_rearms() {
        let mut detector = RecoveryDetector::new(Duration::from_secs(1));
        detector.observe(at(0), false);
        assert!(detector.observe(at(1), false).is_some());

        detector.reset();
        assert!(!detector.is_declared());
        assert_eq!(detector.observe(at(5), false), None);
        assert!(detector.observe(at(6), false).is_some());
    }
}
