//! Travel bearing estimation for marker orientation.
//!
//! A device heading on the incoming fix is used as-is. Without one, the
//! bearing between consecutive fixes is used, unless they are too close
//! together for the direction to mean anything. The raw value is then
//! smoothed with an angle-aware exponential moving average.

use crate::fix::PositionFix;
use crate::geo::{bearing, haversine, wrap_180, wrap_360};

/// Default smoothing factor.
pub const DEFAULT_ALPHA: f64 = 0.3;

/// Default displacement below which fix-to-fix bearings are ignored.
pub const DEFAULT_NOISE_FLOOR_M: f64 = 2.0;

/// Smoothed bearing estimator.
#[derive(Debug, Clone, PartialEq)]
pub struct HeadingEstimator {
    alpha: f64,
    noise_floor_m: f64,
    smoothed: Option<f64>,
}

impl Default for HeadingEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_ALPHA, DEFAULT_NOISE_FLOOR_M)
    }
}

impl HeadingEstimator {
    /// Create an estimator.
    ///
    /// Alpha is clamped to [0.0, 1.0]. Lower alpha = more smoothing.
    #[must_use]
    pub fn new(alpha: f64, noise_floor_m: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            noise_floor_m,
            smoothed: None,
        }
    }

    /// The current smoothed bearing, if one has been established.
    #[must_use]
    pub fn current(&self) -> Option<f64> {
        self.smoothed
    }

    /// Raw bearing for the new fix, before smoothing.
    ///
    /// Returns `None` when there is neither a device heading nor enough
    /// displacement since the previous fix.
    #[must_use]
    pub fn raw_bearing(&self, prev: Option<&PositionFix>, new: &PositionFix) -> Option<f64> {
        if let Some(heading) = new.heading_degrees.filter(|h| h.is_finite()) {
            return Some(wrap_360(heading));
        }
        let prev = prev?;
        let displacement = haversine(prev.position(), new.position());
        if displacement < self.noise_floor_m {
            return None;
        }
        Some(bearing(prev.position(), new.position()))
    }

    /// Update the estimate with a new fix and return the smoothed bearing.
    ///
    /// The previous bearing is retained when the fix carries no usable
    /// direction.
    pub fn estimate(&mut self, prev: Option<&PositionFix>, new: &PositionFix) -> Option<f64> {
        if let Some(raw) = self.raw_bearing(prev, new) {
            self.apply(raw);
        }
        self.smoothed
    }

    /// Blend a raw bearing into the smoothed value along the shortest arc.
    fn apply(&mut self, raw: f64) -> f64 {
        let next = match self.smoothed {
            None => raw,
            Some(prev) => wrap_360(prev + self.alpha * wrap_180(raw - prev)),
        };
        self.smoothed = Some(next);
        next
    }

    /// Forget the smoothed bearing.
    pub fn reset(&mut self) {
        self.smoothed = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fix(lat: f64, lng: f64) -> PositionFix {
        PositionFix::new(lat, lng, 5.0, 0)
    }

    #[test]
    fn test_first_bearing_is_raw() {
        let mut est = HeadingEstimator::default();
        // Due east, ~111 m
        let b = est.estimate(Some(&fix(0.0, 0.0)), &fix(0.0, 0.001)).unwrap();
        assert!((b - 90.0).abs() < 0.1);
    }

    #[test]
    fn test_device_heading_preferred() {
        let mut est = HeadingEstimator::default();
        let new = fix(0.0, 0.001).with_heading(45.0);
        let b = est.estimate(Some(&fix(0.0, 0.0)), &new).unwrap();
        assert!((b - 45.0).abs() < 1e-9);
    }

    #[test]
    fn test_jitter_below_noise_floor_keeps_previous() {
        let mut est = HeadingEstimator::default();
        est.estimate(Some(&fix(0.0, 0.0)), &fix(0.0, 0.001));
        // ~1 m step backwards would otherwise flip the bearing by 180°
        let b = est
            .estimate(Some(&fix(0.0, 0.001)), &fix(0.0, 0.000_991))
            .unwrap();
        assert!((b - 90.0).abs() < 0.1, "got {b}");
    }

    #[test]
    fn test_no_previous_fix_no_heading() {
        let mut est = HeadingEstimator::default();
        assert!(est.estimate(None, &fix(0.0, 0.0)).is_none());
    }

    #[test]
    fn test_smoothing_uses_alpha() {
        let mut est = HeadingEstimator::new(0.3, 2.0);
        est.estimate(None, &fix(0.0, 0.0).with_heading(90.0));
        let b = est.estimate(None, &fix(0.0, 0.0).with_heading(100.0)).unwrap();
        assert!((b - 93.0).abs() < 1e-9, "got {b}");
    }

    #[test]
    fn test_smoothing_wraps_through_north() {
        let mut est = HeadingEstimator::new(0.3, 2.0);
        est.estimate(None, &fix(0.0, 0.0).with_heading(350.0));
        let b = est.estimate(None, &fix(0.0, 0.0).with_heading(10.0)).unwrap();
        assert!((b - 356.0).abs() < 1e-9, "got {b}");
    }

    #[test]
    fn test_reset() {
        let mut est = HeadingEstimator::default();
        est.estimate(None, &fix(0.0, 0.0).with_heading(90.0));
        est.reset();
        assert!(est.current().is_none());
    }
}
