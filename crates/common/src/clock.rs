//! Recording clock and timing utilities.
//!
//! Every frame and audio sample in a session is stamped against a single
//! monotonic epoch captured when the recording starts. Wall-clock time is
//! kept only for reporting.

use std::time::{Duration, Instant};

/// Session-relative timestamps in seconds. Cloned into every producer of a
/// session so all streams share one origin.
#[derive(Debug, Clone)]
pub struct RecordingClock {
    epoch: Instant,
    /// RFC 3339 wall time at `epoch`, for reports only.
    epoch_wall: String,
}

impl RecordingClock {
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_wall: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Rebuild a clock around an epoch taken elsewhere.
    pub fn from_epoch(epoch: Instant, wall: String) -> Self {
        Self {
            epoch,
            epoch_wall: wall,
        }
    }

    /// Seconds elapsed since recording start.
    pub fn elapsed_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Seconds between the epoch and `instant`, saturating at zero for
    /// instants taken before the recording started.
    pub fn secs_at(&self, instant: Instant) -> f64 {
        instant
            .checked_duration_since(self.epoch)
            .unwrap_or(Duration::ZERO)
            .as_secs_f64()
    }

    pub fn epoch_wall(&self) -> &str {
        &self.epoch_wall
    }

    pub fn epoch(&self) -> Instant {
        self.epoch
    }
}

/// Drift between where a stream believes it is and when its data arrived.
#[derive(Debug, Clone, Copy)]
pub struct DriftMeasurement {
    /// Timestamp the stream assigned to its data (seconds).
    pub expected_secs: f64,
    /// Timestamp at which the data actually arrived (seconds).
    pub observed_secs: f64,
}

impl DriftMeasurement {
    /// Drift in milliseconds (positive = data arrived later than expected).
    pub fn drift_ms(&self) -> f64 {
        (self.observed_secs - self.expected_secs) * 1000.0
    }

    /// Whether drift exceeds an acceptable threshold.
    pub fn exceeds_threshold_ms(&self, threshold_ms: f64) -> bool {
        self.drift_ms().abs() > threshold_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_elapsed() {
        let clock = RecordingClock::start();
        assert!(clock.elapsed_secs() < 1.0);
    }

    #[test]
    fn test_secs_at_saturates_before_epoch() {
        let before = Instant::now();
        std::thread::sleep(Duration::from_millis(2));
        let clock = RecordingClock::start();
        assert_eq!(clock.secs_at(before), 0.0);

        let later = clock.epoch() + Duration::from_millis(1500);
        assert!((clock.secs_at(later) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_drift_measurement() {
        let drift = DriftMeasurement {
            expected_secs: 1.0,
            observed_secs: 1.05,
        };
        assert!((drift.drift_ms() - 50.0).abs() < 1e-6);
        assert!(drift.exceeds_threshold_ms(10.0));
        assert!(!drift.exceeds_threshold_ms(100.0));
    }
}
