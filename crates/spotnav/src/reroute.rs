//! Deviation tracking and reroute decisions.

use tracing::{debug, trace};

use crate::fix::PositionFix;
use crate::geo::project_on_segment;
use crate::route::Route;

/// Default deviation threshold in meters.
pub const DEFAULT_DEVIATION_THRESHOLD_M: f64 = 50.0;

/// Default number of consecutive off-route fixes before rerouting.
pub const DEFAULT_DEBOUNCE_COUNT: u32 = 3;

/// Outcome of feeding one fix to the [`RerouteDecider`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviationReport {
    /// Distance from the fix to the nearest point of the current or next step.
    pub deviation_meters: f64,
    /// Off-route fixes in a row, after this fix.
    pub consecutive_deviated_fixes: u32,
    /// Whether a new route should be requested now.
    pub should_reroute: bool,
}

/// Tracks sustained deviation from the route.
///
/// A single noisy fix never triggers a reroute: the decider fires only after
/// `debounce_count` consecutive fixes beyond the threshold, and resets its
/// counter when it fires so one sustained deviation yields one request.
#[derive(Debug, Clone, PartialEq)]
pub struct RerouteDecider {
    threshold_m: f64,
    debounce_count: u32,
    consecutive: u32,
}

impl Default for RerouteDecider {
    fn default() -> Self {
        Self::new(DEFAULT_DEVIATION_THRESHOLD_M, DEFAULT_DEBOUNCE_COUNT)
    }
}

impl RerouteDecider {
    /// Create a decider.
    ///
    /// A `debounce_count` of 0 is treated as 1.
    #[must_use]
    pub fn new(threshold_m: f64, debounce_count: u32) -> Self {
        Self {
            threshold_m,
            debounce_count: debounce_count.max(1),
            consecutive: 0,
        }
    }

    /// Off-route fixes seen in a row so far.
    #[must_use]
    pub fn consecutive_deviated_fixes(&self) -> u32 {
        self.consecutive
    }

    /// Forget any accumulated deviation.
    pub fn reset(&mut self) {
        self.consecutive = 0;
    }

    /// Perpendicular distance from the fix to the current or next step's
    /// segment, whichever is closer. Zero for an empty route.
    #[must_use]
    pub fn deviation(fix: &PositionFix, route: &Route, current: usize) -> f64 {
        let position = fix.position();
        route
            .steps()
            .iter()
            .skip(current)
            .take(2)
            .map(|step| project_on_segment(position, step.start_point, step.end_point).distance_m)
            .fold(None, |best: Option<f64>, d| Some(best.map_or(d, |b| b.min(d))))
            .unwrap_or(0.0)
    }

    /// Feed one fix and decide whether to reroute.
    pub fn update(&mut self, fix: &PositionFix, route: &Route, current: usize) -> DeviationReport {
        let deviation_meters = Self::deviation(fix, route, current);

        if deviation_meters > self.threshold_m {
            self.consecutive += 1;
            trace!(
                deviation_m = deviation_meters,
                consecutive = self.consecutive,
                "Fix off route"
            );
        } else {
            self.consecutive = 0;
        }

        let should_reroute = self.consecutive >= self.debounce_count;
        let report = DeviationReport {
            deviation_meters,
            consecutive_deviated_fixes: self.consecutive,
            should_reroute,
        };
        if should_reroute {
            debug!(
                deviation_m = deviation_meters,
                fixes = self.consecutive,
                "Sustained deviation, reroute needed"
            );
            self.consecutive = 0;
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{haversine, LatLng};
    use crate::route::{ManeuverKind, Step};

    fn route() -> Route {
        let a = LatLng::new(0.0, 0.0);
        let b = LatLng::new(0.0, 0.01);
        let c = LatLng::new(0.01, 0.01);
        Route::new(
            vec![
                Step::new("east", ManeuverKind::Straight, a, b, haversine(a, b), 60.0),
                Step::new("north", ManeuverKind::TurnLeft, b, c, haversine(b, c), 60.0),
            ],
            c,
        )
    }

    fn on_route() -> PositionFix {
        PositionFix::new(0.0, 0.005, 5.0, 0)
    }

    /// ~111 m north of the first segment.
    fn off_route() -> PositionFix {
        PositionFix::new(0.001, 0.003, 5.0, 0)
    }

    #[test]
    fn test_deviation_is_perpendicular_not_vertex_distance() {
        let d = RerouteDecider::deviation(&on_route(), &route(), 0);
        assert!(d < 1.0, "got {d}");
    }

    #[test]
    fn test_deviation_considers_next_step() {
        // On the second segment while the matcher still says step 0.
        let fix = PositionFix::new(0.005, 0.01, 5.0, 0);
        let d = RerouteDecider::deviation(&fix, &route(), 0);
        assert!(d < 1.0, "got {d}");
    }

    #[test]
    fn test_deviation_empty_route_is_zero() {
        let empty = Route::new(Vec::new(), LatLng::new(0.0, 0.0));
        assert_eq!(RerouteDecider::deviation(&off_route(), &empty, 0), 0.0);
    }

    #[test]
    fn test_debounce_below_count_never_fires() {
        let route = route();
        let mut decider = RerouteDecider::default();
        assert!(!decider.update(&off_route(), &route, 0).should_reroute);
        assert!(!decider.update(&off_route(), &route, 0).should_reroute);
        let report = decider.update(&on_route(), &route, 0);
        assert!(!report.should_reroute);
        assert_eq!(report.consecutive_deviated_fixes, 0);
    }

    #[test]
    fn test_fires_once_at_debounce_count() {
        let route = route();
        let mut decider = RerouteDecider::default();
        let fired: Vec<bool> = (0..3)
            .map(|_| decider.update(&off_route(), &route, 0).should_reroute)
            .collect();
        assert_eq!(fired, vec![false, false, true]);
        assert_eq!(decider.consecutive_deviated_fixes(), 0);
        // Sustained deviation must accumulate again before firing.
        assert!(!decider.update(&off_route(), &route, 0).should_reroute);
    }

    #[test]
    fn test_reset_clears_counter() {
        let route = route();
        let mut decider = RerouteDecider::default();
        decider.update(&off_route(), &route, 0);
        decider.update(&off_route(), &route, 0);
        decider.reset();
        assert!(!decider.update(&off_route(), &route, 0).should_reroute);
    }

    #[test]
    fn test_zero_debounce_treated_as_one() {
        let route = route();
        let mut decider = RerouteDecider::new(50.0, 0);
        assert!(decider.update(&off_route(), &route, 0).should_reroute);
    }
}
