//! Outlier-rejecting complementary filter.
//!
//! One running mean per stream. A sample is compared with the mean through the
//! relative deviation `d = (mean - sample) / (mean + sample)`; once `d * scale`
//! exceeds the threshold the sample is rejected. Depending on the policy the
//! mean is then either nudged with a gain shrunk by `1 / (d * 10)` or left alone.
#[allow(unused_imports)]
use micromath::F32Ext;
use serde::{Deserialize, Serialize};

pub const BASE_GAIN: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RejectPolicy {
    /// Count the outlier and track it with a reduced gain
    Damp,
    /// Count the outlier and leave the mean untouched
    Discard,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutlierConfig {
    pub scale: f32,
    /// Zero disables rejection
    pub threshold: f32,
    pub base_gain: f32,
    /// Only deviations below the mean count when false
    pub two_sided: bool,
    pub policy: RejectPolicy,
}

impl OutlierConfig {
    /// Barometer pressure check, `range` in the same units as `d * 200`
    pub const fn baro(range: f32) -> Self {
        Self {
            scale: 200.0,
            threshold: range,
            base_gain: BASE_GAIN,
            two_sided: true,
            policy: RejectPolicy::Damp,
        }
    }

    /// Compass field length, rejects above 25% deviation
    pub const fn compass() -> Self {
        Self {
            scale: 100.0,
            threshold: 25.0,
            base_gain: BASE_GAIN,
            two_sided: true,
            policy: RejectPolicy::Damp,
        }
    }

    /// Accelerometer magnitude, rejects a collapse of more than 20%
    pub const fn accel() -> Self {
        Self {
            scale: 100.0,
            threshold: 20.0,
            base_gain: BASE_GAIN,
            two_sided: false,
            policy: RejectPolicy::Discard,
        }
    }

    /// Pure filter step. Returns whether the sample is accepted and the new mean.
    pub fn step(&self, mean: f32, sample: f32) -> Step {
        if !sample.is_finite() {
            return Step::Invalid;
        }
        if mean == 0.0 {
            return Step::Accepted(sample);
        }

        let mut d = (mean - sample) / (mean + sample);
        if self.two_sided {
            d = d.abs();
        }

        if self.threshold == 0.0 || d * self.scale <= self.threshold {
            return Step::Accepted(mean * (1.0 - self.base_gain) + sample * self.base_gain);
        }

        match self.policy {
            RejectPolicy::Damp => {
                let k = self.base_gain / (d * 10.0);
                Step::Rejected(mean * (1.0 - k) + sample * k)
            }
            RejectPolicy::Discard => Step::Rejected(mean),
        }
    }
}

impl Default for OutlierConfig {
    fn default() -> Self {
        Self::baro(10.0)
    }
}

/// Outcome of one filter step
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    Accepted(f32),
    /// Outlier. Carries the mean after the damped update.
    Rejected(f32),
    /// Not a finite number, nothing changes
    Invalid,
}

impl Step {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Step::Accepted(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutlierFilter {
    config: OutlierConfig,
    mean: f32,
    error_count: u32,
}

impl OutlierFilter {
    pub const fn new(config: OutlierConfig) -> Self {
        Self {
            config,
            mean: 0.0,
            error_count: 0,
        }
    }

    /// Feed a sample, true when it may be forwarded.
    pub fn filter(&mut self, sample: f32) -> bool {
        match self.config.step(self.mean, sample) {
            Step::Accepted(mean) => {
                self.mean = mean;
                true
            }
            Step::Rejected(mean) => {
                warn!("outlier rejected: mean {} sample {}", self.mean, sample);
                self.mean = mean;
                self.error_count = self.error_count.wrapping_add(1);
                false
            }
            Step::Invalid => false,
        }
    }

    pub fn mean(&self) -> f32 {
        self.mean
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    pub fn config(&self) -> &OutlierConfig {
        &self.config
    }

    /// Back to the uninitialised state, used on sensor re-initialisation
    pub fn reset(&mut self) {
        self.mean = 0.0;
        self.error_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32, tol: f32) -> bool {
        (a - b).abs() <= tol
    }

    #[test]
    fn test_baro_scenario() {
        let mut f = OutlierFilter::new(OutlierConfig::baro(10.0));
        assert!(f.filter(101_325.0));
        assert_eq!(f.mean(), 101_325.0);

        assert!(f.filter(101_300.0));
        assert!(approx(f.mean(), 101_322.5, 0.05), "mean {}", f.mean());

        let before = f.mean();
        assert!(!f.filter(50_000.0));
        assert_eq!(f.error_count(), 1);
        let moved = before - f.mean();
        assert!(moved > 0.0, "mean must still drift toward the outlier");
        // a full base step would be 10% of the gap
        assert!(moved < 0.1 * (before - 50_000.0) * 0.5);
    }

    #[test]
    fn test_convergence_without_errors() {
        let mut f = OutlierFilter::new(OutlierConfig::baro(10.0));
        f.filter(1000.0);
        for i in 0..200 {
            let sample = if i % 2 == 0 { 1010.0 } else { 1020.0 };
            assert!(f.filter(sample));
        }
        assert!(approx(f.mean(), 1015.0, 5.0), "mean {}", f.mean());
        assert_eq!(f.error_count(), 0);
    }

    #[test]
    fn test_outlier_moves_less_than_in_range_sample() {
        let mut a = OutlierFilter::new(OutlierConfig::baro(10.0));
        let mut b = a;
        a.filter(100.0);
        b.filter(100.0);

        a.filter(1000.0);
        b.filter(101.0);
        let outlier_gain = (a.mean() - 100.0) / (1000.0 - 100.0);
        let in_range_gain = (b.mean() - 100.0) / (101.0 - 100.0);
        assert!(outlier_gain < in_range_gain);
        assert_eq!(a.error_count(), 1);
        assert_eq!(b.error_count(), 0);
    }

    #[test]
    fn test_non_finite_leaves_mean() {
        let mut f = OutlierFilter::new(OutlierConfig::compass());
        f.filter(500.0);
        assert!(!f.filter(f32::NAN));
        assert!(!f.filter(f32::INFINITY));
        assert_eq!(f.mean(), 500.0);
        assert_eq!(f.error_count(), 0);
    }

    #[test]
    fn test_zero_threshold_accepts_everything() {
        let mut f = OutlierFilter::new(OutlierConfig::baro(0.0));
        f.filter(10.0);
        assert!(f.filter(10_000.0));
        assert_eq!(f.error_count(), 0);
    }

    #[test]
    fn test_accel_check_is_one_sided() {
        let mut f = OutlierFilter::new(OutlierConfig::accel());
        f.filter(9.8);
        // a longer vector passes
        assert!(f.filter(30.0));
        let mean = f.mean();
        // a collapse is discarded without touching the mean
        assert!(!f.filter(1.0));
        assert_eq!(f.mean(), mean);
        assert_eq!(f.error_count(), 1);
    }

    #[test]
    fn test_compass_threshold() {
        let cfg = OutlierConfig::compass();
        // 20% deviation passes, 30% does not
        assert!(cfg.step(500.0, 500.0 * 1.5).is_accepted());
        assert!(!cfg.step(500.0, 500.0 * 1.9).is_accepted());
    }
}
