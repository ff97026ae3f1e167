//! Aggregate transfer rate over a short rolling window.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub at: Instant,
    pub bytes: u64,
}

/// Rolling-window rate estimator.
///
/// The rate is taken across the whole retained window rather than between the
/// last two samples, which damps poll jitter. When the window cannot produce a
/// rate (fewer than two samples, zero elapsed time) the previous estimate is
/// held.
#[derive(Debug, Clone)]
pub struct ThroughputEstimator {
    window: Duration,
    max_samples: usize,
    samples: VecDeque<Sample>,
    rate: f64,
}

impl ThroughputEstimator {
    pub fn new(window: Duration, max_samples: usize) -> Self {
        let max_samples = max_samples.max(2);
        Self {
            window,
            max_samples,
            samples: VecDeque::with_capacity(max_samples),
            rate: 0.0,
        }
    }

    /// Records `bytes` (a cumulative counter) at `at` and returns the current
    /// estimate in bytes per second.
    pub fn observe(&mut self, at: Instant, bytes: u64) -> f64 {
        if let Some(newest) = self.samples.back() {
            if at < newest.at {
                debug!("sample older than window head, restarting throughput window");
                self.samples.clear();
            }
        }

        self.samples.push_back(Sample { at, bytes });
        while self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
        while let Some(oldest) = self.samples.front() {
            if at.duration_since(oldest.at) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }

        if let (Some(earliest), Some(latest)) = (self.samples.front(), self.samples.back()) {
            let elapsed = latest.at.saturating_duration_since(earliest.at);
            if self.samples.len() >= 2 && !elapsed.is_zero() {
                // A counter that moved backwards means nothing was gained.
                let gained = latest.bytes.saturating_sub(earliest.bytes);
                self.rate = gained as f64 / elapsed.as_secs_f64();
            }
        }

        self.rate
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }
}

const RATE_UNITS: [&str; 5] = ["B/s", "KiB/s", "MiB/s", "GiB/s", "TiB/s"];

/// A bytes-per-second figure scaled to the largest binary unit that keeps the
/// value at or above 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaledRate {
    pub value: f64,
    pub unit: &'static str,
}

impl ScaledRate {
    pub fn from_bytes_per_sec(rate: f64) -> Self {
        if !rate.is_finite() || rate <= 0.0 {
            return Self { value: 0.0, unit: RATE_UNITS[0] };
        }

        // Rounded to display precision before the unit is chosen, so a value
        // never prints as 1024 of a unit.
        let mut value = rate;
        let mut unit = 0;
        loop {
            let rounded = round_to(value, if unit == 0 { 0 } else { 2 });
            if rounded >= 1024.0 && unit < RATE_UNITS.len() - 1 {
                value /= 1024.0;
                unit += 1;
            } else {
                return Self { value: rounded, unit: RATE_UNITS[unit] };
            }
        }
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

impl fmt::Display for ScaledRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unit == RATE_UNITS[0] {
            write!(f, "{:.0} {}", self.value, self.unit)
        } else {
            write!(f, "{:.2} {}", self.value, self.unit)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator() -> ThroughputEstimator {
        ThroughputEstimator::new(Duration::from_secs(3), 16)
    }

    #[test]
    fn single_sample_holds_zero() {
        let mut est = estimator();
        assert_eq!(est.observe(Instant::now(), 10_000), 0.0);
    }

    #[test]
    fn rate_spans_the_window() {
        let mut est = estimator();
        let t0 = Instant::now();
        est.observe(t0, 0);
        est.observe(t0 + Duration::from_millis(500), 400);
        let rate = est.observe(t0 + Duration::from_secs(1), 1000);
        assert!((rate - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn identical_timestamps_hold_previous_rate() {
        let mut est = estimator();
        let t0 = Instant::now();
        est.observe(t0, 0);
        let before = est.observe(t0 + Duration::from_secs(1), 1000);
        assert!((before - 1000.0).abs() < 1e-6);

        // Both earlier samples fall out of the window, leaving two samples
        // that share one timestamp.
        let t10 = t0 + Duration::from_secs(10);
        est.observe(t10, 5000);
        let held = est.observe(t10, 9000);
        assert_eq!(held, before);
        assert!(held.is_finite());
    }

    #[test]
    fn old_samples_are_evicted() {
        let mut est = estimator();
        let t0 = Instant::now();
        est.observe(t0, 0);
        est.observe(t0 + Duration::from_secs(1), 100_000);
        est.observe(t0 + Duration::from_secs(4), 100_100);
        let rate = est.observe(t0 + Duration::from_secs(5), 100_200);
        assert_eq!(est.samples().count(), 2);
        assert!((rate - 100.0).abs() < 1e-6);
    }

    #[test]
    fn window_gap_holds_previous_rate() {
        let mut est = estimator();
        let t0 = Instant::now();
        est.observe(t0, 0);
        let rate = est.observe(t0 + Duration::from_secs(1), 500);
        let after_gap = est.observe(t0 + Duration::from_secs(30), 900);
        assert_eq!(after_gap, rate);
    }

    #[test]
    fn sample_cap_is_respected() {
        let mut est = ThroughputEstimator::new(Duration::from_secs(60), 4);
        let t0 = Instant::now();
        for i in 0..10u64 {
            est.observe(t0 + Duration::from_secs(i), i * 10);
        }
        assert_eq!(est.samples().count(), 4);
        assert!((est.rate() - 10.0).abs() < 1e-6);
    }

    #[test]
    fn backwards_counter_reports_zero_not_negative() {
        let mut est = estimator();
        let t0 = Instant::now();
        est.observe(t0, 1000);
        let rate = est.observe(t0 + Duration::from_secs(1), 200);
        assert_eq!(rate, 0.0);
    }

    #[test]
    fn earlier_timestamp_restarts_window_and_holds() {
        let mut est = estimator();
        let t0 = Instant::now();
        est.observe(t0 + Duration::from_secs(1), 0);
        let rate = est.observe(t0 + Duration::from_secs(2), 1000);
        assert_eq!(est.observe(t0, 50_000), rate);
        assert_eq!(est.samples().count(), 1);
    }

    #[test]
    fn scales_into_binary_units() {
        assert_eq!(ScaledRate::from_bytes_per_sec(0.0).to_string(), "0 B/s");
        assert_eq!(ScaledRate::from_bytes_per_sec(512.0).to_string(), "512 B/s");
        assert_eq!(ScaledRate::from_bytes_per_sec(1536.0).to_string(), "1.50 KiB/s");
        assert_eq!(ScaledRate::from_bytes_per_sec(5.0 * 1024.0 * 1024.0).unit, "MiB/s");
        assert_eq!(ScaledRate::from_bytes_per_sec(f64::INFINITY).value, 0.0);

        assert_eq!(ScaledRate::from_bytes_per_sec(1023.7).to_string(), "1.00 KiB/s");
        assert_eq!(ScaledRate::from_bytes_per_sec(1023.4).to_string(), "1023 B/s");
        assert_eq!(ScaledRate::from_bytes_per_sec(1024.0 * 1023.999).to_string(), "1.00 MiB/s");

        let scaled = ScaledRate::from_bytes_per_sec(123_456_789.0);
        assert!(scaled.value >= 1.0 && scaled.value < 1024.0);
    }
}
