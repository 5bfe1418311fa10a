//! Step matching: which step of the route is the driver on?
//!
//! Every step is scored by the distance from the fix to its start point. The
//! current step is instead scored by the perpendicular distance to its
//! segment while the driver is still on it, so a driver halfway down a long
//! street is not pulled towards the next step's start.
//!
//! The best-scoring step only replaces the current one if it is the next
//! step and beats the current score by a hysteresis margin. Jumps of more
//! than one step forward and any backward move are rejected; only a reroute
//! resets the index.

use tracing::trace;

use crate::fix::PositionFix;
use crate::geo::{haversine, project_on_segment};
use crate::route::Route;

/// Default hysteresis margin in meters.
pub const DEFAULT_HYSTERESIS_M: f64 = 5.0;

/// Maps position fixes onto route steps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepMatcher {
    hysteresis_m: f64,
}

impl Default for StepMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_HYSTERESIS_M)
    }
}

impl StepMatcher {
    /// Create a matcher with the given hysteresis margin.
    #[must_use]
    pub fn new(hysteresis_m: f64) -> Self {
        Self {
            hysteresis_m: hysteresis_m.max(0.0),
        }
    }

    /// Score of step `index` for the fix; lower is better.
    fn score(route: &Route, fix: &PositionFix, index: usize, current: usize) -> f64 {
        let Some(step) = route.step(index) else {
            return f64::INFINITY;
        };
        let position = fix.position();
        if index == current {
            let projection = project_on_segment(position, step.start_point, step.end_point);
            if projection.is_within() {
                return projection.distance_m;
            }
        }
        haversine(position, step.start_point)
    }

    /// Return the step index the fix belongs to.
    ///
    /// Routes with zero or one step always match index 0.
    #[must_use]
    pub fn match_step(&self, fix: &PositionFix, route: &Route, current: usize) -> usize {
        if route.len() <= 1 {
            return 0;
        }
        let current = current.min(route.len() - 1);

        let current_score = Self::score(route, fix, current, current);
        let (best, best_score) = (0..route.len())
            .map(|i| (i, Self::score(route, fix, i, current)))
            .fold((current, current_score), |acc, candidate| {
                if candidate.1 < acc.1 {
                    candidate
                } else {
                    acc
                }
            });

        if best == current || best_score >= current_score - self.hysteresis_m {
            return current;
        }

        if best == current + 1 {
            trace!(from = current, to = best, score = best_score, "Advancing step");
            best
        } else {
            trace!(
                current,
                candidate = best,
                score = best_score,
                "Rejecting non-sequential step candidate"
            );
            current
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{midpoint, LatLng};
    use crate::route::{ManeuverKind, Step};

    /// Points ~111 m apart along the equator heading east, then north.
    fn points() -> [LatLng; 4] {
        [
            LatLng::new(0.0, 0.0),
            LatLng::new(0.0, 0.001),
            LatLng::new(0.001, 0.001),
            LatLng::new(0.001, 0.002),
        ]
    }

    fn route_through(points: &[LatLng]) -> Route {
        let steps = points
            .windows(2)
            .map(|w| {
                Step::new(
                    "go",
                    ManeuverKind::Straight,
                    w[0],
                    w[1],
                    haversine(w[0], w[1]),
                    10.0,
                )
            })
            .collect();
        Route::new(steps, *points.last().unwrap())
    }

    fn fix(p: LatLng) -> PositionFix {
        PositionFix::at(p, 0)
    }

    #[test]
    fn test_stays_on_current_mid_segment() {
        let p = points();
        let route = route_through(&p);
        let matcher = StepMatcher::default();
        assert_eq!(matcher.match_step(&fix(midpoint(p[0], p[1])), &route, 0), 0);
    }

    #[test]
    fn test_advances_at_next_start() {
        let p = points();
        let route = route_through(&p);
        let matcher = StepMatcher::default();
        assert_eq!(matcher.match_step(&fix(p[1]), &route, 0), 1);
    }

    #[test]
    fn test_rejects_jump_of_two() {
        let p = points();
        let route = route_through(&p);
        let matcher = StepMatcher::default();
        assert_eq!(matcher.match_step(&fix(p[2]), &route, 0), 0);
    }

    #[test]
    fn test_never_moves_backward() {
        let p = points();
        let route = route_through(&p);
        let matcher = StepMatcher::default();
        assert_eq!(matcher.match_step(&fix(p[0]), &route, 2), 2);
    }

    #[test]
    fn test_hysteresis_blocks_marginal_improvement() {
        let p = points();
        let route = route_through(&p);
        // Margin larger than the whole segment: nothing can beat it.
        let matcher = StepMatcher::new(500.0);
        assert_eq!(matcher.match_step(&fix(p[1]), &route, 0), 0);
    }

    #[test]
    fn test_degenerate_routes_match_zero() {
        let p = points();
        let single = route_through(&p[..2]);
        let empty = Route::new(Vec::new(), p[0]);
        let matcher = StepMatcher::default();
        assert_eq!(matcher.match_step(&fix(p[3]), &single, 0), 0);
        assert_eq!(matcher.match_step(&fix(p[3]), &empty, 0), 0);
    }

    #[test]
    fn test_forward_travel_is_monotonic() {
        let p = points();
        let route = route_through(&p);
        let matcher = StepMatcher::default();

        let mut trace = Vec::new();
        for w in p.windows(2) {
            for k in 0..4 {
                let t = f64::from(k) / 4.0;
                trace.push(LatLng::new(
                    w[0].lat + t * (w[1].lat - w[0].lat),
                    w[0].lng + t * (w[1].lng - w[0].lng),
                ));
            }
        }
        trace.push(p[3]);

        let mut current = 0;
        for point in trace {
            let next = matcher.match_step(&fix(point), &route, current);
            assert!(next >= current);
            assert!(next - current <= 1);
            current = next;
        }
        assert_eq!(current, 2);
    }
}
