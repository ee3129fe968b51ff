//! Load classification for the scheduling loop.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::LoadThresholds;

/// Discrete load classification. Ordered from least to most loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadLevel {
    Low,
    Normal,
    High,
    Critical,
}

impl std::fmt::Display for LoadLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadLevel::Low => write!(f, "low"),
            LoadLevel::Normal => write!(f, "normal"),
            LoadLevel::High => write!(f, "high"),
            LoadLevel::Critical => write!(f, "critical"),
        }
    }
}

/// Level from the share of the concurrency ceiling in use.
pub fn utilisation_level(in_flight: usize, capacity: usize) -> LoadLevel {
    if capacity == 0 || in_flight >= capacity {
        return LoadLevel::Critical;
    }
    let ratio = in_flight as f64 / capacity as f64;
    if ratio <= 0.25 {
        LoadLevel::Low
    } else if ratio <= 0.60 {
        LoadLevel::Normal
    } else {
        LoadLevel::High
    }
}

/// Exponential moving average of loop durations.
#[derive(Debug, Clone)]
pub struct LoadTracker {
    alpha: f64,
    thresholds: LoadThresholds,
    average_ms: Option<f64>,
}

impl LoadTracker {
    pub fn new(alpha: f64, thresholds: LoadThresholds) -> Self {
        Self {
            alpha: alpha.clamp(f64::EPSILON, 1.0),
            thresholds,
            average_ms: None,
        }
    }

    /// Fold one loop duration into the average and return the new average.
    pub fn record(&mut self, loop_duration: Duration) -> f64 {
        let sample = loop_duration.as_secs_f64() * 1000.0;
        let next = match self.average_ms {
            Some(avg) => self.alpha * sample + (1.0 - self.alpha) * avg,
            None => sample,
        };
        self.average_ms = Some(next);
        next
    }

    pub fn average_ms(&self) -> f64 {
        self.average_ms.unwrap_or(0.0)
    }

    pub fn duration_level(&self) -> LoadLevel {
        let avg = self.average_ms();
        let t = &self.thresholds;
        if avg >= t.critical_ms as f64 {
            LoadLevel::Critical
        } else if avg >= t.high_ms as f64 {
            LoadLevel::High
        } else if avg >= t.normal_ms as f64 {
            LoadLevel::Normal
        } else {
            LoadLevel::Low
        }
    }

    /// The worse of the duration and utilisation levels.
    pub fn level(&self, in_flight: usize, capacity: usize) -> LoadLevel {
        self.duration_level()
            .max(utilisation_level(in_flight, capacity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdaptiveIntervals;

    #[test]
    fn test_rising_durations_never_lower_the_level() {
        let intervals = AdaptiveIntervals::default();
        let mut tracker = LoadTracker::new(0.3, LoadThresholds::default());

        let mut prev_level = LoadLevel::Low;
        let mut prev_interval = Duration::ZERO;
        for ms in (0..60).map(|i| i * 60) {
            tracker.record(Duration::from_millis(ms));
            let level = tracker.level(0, 4);
            let interval = intervals.get(level);
            assert!(level >= prev_level, "level dropped at {}ms", ms);
            assert!(interval >= prev_interval);
            prev_level = level;
            prev_interval = interval;
        }
        assert_eq!(prev_level, LoadLevel::Critical);
    }

    #[test]
    fn test_first_sample_seeds_average() {
        let mut tracker = LoadTracker::new(0.3, LoadThresholds::default());
        assert_eq!(tracker.record(Duration::from_millis(200)), 200.0);
        let next = tracker.record(Duration::from_millis(100));
        assert!((next - 170.0).abs() < 1e-9);
        assert_eq!(tracker.duration_level(), LoadLevel::Normal);
    }

    #[test]
    fn test_utilisation_levels() {
        assert_eq!(utilisation_level(0, 4), LoadLevel::Low);
        assert_eq!(utilisation_level(1, 4), LoadLevel::Low);
        assert_eq!(utilisation_level(2, 4), LoadLevel::Normal);
        assert_eq!(utilisation_level(3, 4), LoadLevel::High);
        assert_eq!(utilisation_level(4, 4), LoadLevel::Critical);
    }

    #[test]
    fn test_saturation_dominates_fast_loops() {
        let mut tracker = LoadTracker::new(0.3, LoadThresholds::default());
        tracker.record(Duration::from_millis(1));
        assert_eq!(tracker.level(8, 8), LoadLevel::Critical);
    }
}
