//! The guidance state machine.
//!
//! [`GuidanceController`] owns the active route and all per-session
//! navigation state. It is synchronous: every input (a fix, a position
//! error, a reroute result, a stop) is applied in one call that returns the
//! [`GuidanceEvent`]s it produced. The async [`crate::session`] layer feeds
//! it and executes the reroute requests it emits.
//!
//! ```text
//! Idle ──load_route──▶ RouteLoaded ──start──▶ Navigating ◀──────┐
//!                                               │  ▲            │
//!                                     deviation │  │ result     │
//!                                               ▼  │            │
//!                                             Rerouting ──(exhausted)──▶ Error
//! any ──stop──▶ Stopped ◀──arrival── Navigating
//! ```

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::announcer::{Announcer, Speaker};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fix::PositionFix;
use crate::geo::{haversine, LatLng};
use crate::heading::HeadingEstimator;
use crate::matcher::StepMatcher;
use crate::reroute::RerouteDecider;
use crate::route::{Route, RouteSummary, Step};
use crate::source::PositionError;

/// Lifecycle state of a navigation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationStatus {
    /// No route.
    #[default]
    Idle,
    /// A route is loaded but tracking has not started.
    RouteLoaded,
    /// Fixes are being matched against the route.
    Navigating,
    /// Waiting for a new route; the last good route stays displayed.
    Rerouting,
    /// Session ended by the user or by arrival.
    Stopped,
    /// Session failed and needs a new route.
    Error,
}

impl std::fmt::Display for NavigationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::RouteLoaded => write!(f, "route loaded"),
            Self::Navigating => write!(f, "navigating"),
            Self::Rerouting => write!(f, "rerouting"),
            Self::Stopped => write!(f, "stopped"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A request for a new route, emitted when the driver leaves the route.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RerouteRequest {
    /// Identifies the request; results carrying another ticket are stale.
    pub ticket: u64,
    /// Where the driver is now.
    pub origin: LatLng,
    /// The unchanged destination.
    pub destination: LatLng,
}

/// Something that happened while processing an input.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GuidanceEvent {
    /// The session moved to a new state.
    StatusChanged {
        /// Previous state.
        from: NavigationStatus,
        /// New state.
        to: NavigationStatus,
    },
    /// The driver advanced to a new step.
    StepChanged {
        /// The new step index.
        index: usize,
        /// Version of the route the index refers to.
        version: u64,
    },
    /// A step was announced.
    Announced {
        /// The announced step index.
        index: usize,
        /// The phrase, spoken if audio is enabled.
        text: String,
    },
    /// A new route should be computed.
    RerouteRequested(RerouteRequest),
    /// A new route was installed.
    Rerouted {
        /// Version of the new route.
        version: u64,
        /// Number of steps in the new route.
        steps: usize,
    },
    /// Rerouting gave up; guidance continues on the last known route.
    RerouteFailed {
        /// Attempts made in this reroute.
        attempts: u32,
        /// Consecutive failed reroutes so far.
        failed_sessions: u32,
        /// The last provider error.
        message: String,
    },
    /// The driver reached the destination.
    Arrived,
    /// The position source reported an error.
    PositionUnavailable {
        /// What went wrong.
        message: String,
    },
    /// No fix has arrived for too long.
    PositionStale,
    /// Fixes are arriving again after a stale period.
    PositionRestored,
    /// A fix was rejected as malformed.
    FixDiscarded {
        /// Why it was rejected.
        reason: String,
    },
}

impl GuidanceEvent {
    /// Short name of the event, matching its serialized `kind` tag.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StatusChanged { .. } => "status_changed",
            Self::StepChanged { .. } => "step_changed",
            Self::Announced { .. } => "announced",
            Self::RerouteRequested(_) => "reroute_requested",
            Self::Rerouted { .. } => "rerouted",
            Self::RerouteFailed { .. } => "reroute_failed",
            Self::Arrived => "arrived",
            Self::PositionUnavailable { .. } => "position_unavailable",
            Self::PositionStale => "position_stale",
            Self::PositionRestored => "position_restored",
            Self::FixDiscarded { .. } => "fix_discarded",
        }
    }

    /// The step index this event refers to, if any.
    #[must_use]
    pub fn step_index(&self) -> Option<usize> {
        match self {
            Self::StepChanged { index, .. } | Self::Announced { index, .. } => Some(*index),
            _ => None,
        }
    }
}

impl std::fmt::Display for GuidanceEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StatusChanged { from, to } => write!(f, "{from} -> {to}"),
            Self::StepChanged { index, version } => {
                write!(f, "step {index} (route v{version})")
            }
            Self::Announced { index, text } => write!(f, "[{index}] {text}"),
            Self::RerouteRequested(r) => write!(f, "rerouting from {}", r.origin),
            Self::Rerouted { version, steps } => {
                write!(f, "new route v{version} with {steps} steps")
            }
            Self::RerouteFailed {
                attempts,
                failed_sessions,
                message,
            } => write!(
                f,
                "reroute failed after {attempts} attempt(s) ({failed_sessions} in a row): {message}"
            ),
            Self::Arrived => write!(f, "arrived"),
            Self::PositionUnavailable { message } => write!(f, "position unavailable: {message}"),
            Self::PositionStale => write!(f, "position stale"),
            Self::PositionRestored => write!(f, "position restored"),
            Self::FixDiscarded { reason } => write!(f, "fix discarded: {reason}"),
        }
    }
}

/// Read-only snapshot of a navigation session, for map and UI consumers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NavigationState {
    /// Lifecycle state.
    pub status: NavigationStatus,
    /// The active route, replaced wholesale on reroute.
    #[serde(skip)]
    pub route: Option<Arc<Route>>,
    /// Step the driver is on.
    pub current_step_index: usize,
    /// Last step announced on the active route.
    pub last_announced_index: Option<usize>,
    /// Distance from the route at the last fix.
    pub deviation_meters: f64,
    /// Off-route fixes in a row.
    pub consecutive_deviated_fixes: u32,
    /// Smoothed travel bearing for marker rotation.
    pub smoothed_bearing: Option<f64>,
    /// Whether announcements are spoken.
    pub audio_enabled: bool,
    /// Most recent valid fix.
    pub last_fix: Option<PositionFix>,
    /// No fix has arrived within the stale window.
    pub position_stale: bool,
    /// Reroutes in a row that ended without a route.
    pub failed_reroute_sessions: u32,
}

impl NavigationState {
    /// Version of the active route.
    #[must_use]
    pub fn route_version(&self) -> Option<u64> {
        self.route.as_ref().map(|r| r.version())
    }

    /// The step the driver is on.
    #[must_use]
    pub fn current_step(&self) -> Option<&Step> {
        self.route
            .as_ref()
            .and_then(|r| r.step(self.current_step_index))
    }

    /// Distance and time left from the current step.
    #[must_use]
    pub fn remaining(&self) -> Option<RouteSummary> {
        self.route
            .as_ref()
            .map(|r| r.remaining_from(self.current_step_index))
    }
}

/// Tunables the controller reads from [`Config`].
#[derive(Debug, Clone, Copy, PartialEq)]
struct Limits {
    arrival_radius_m: f64,
    max_failed_sessions: u32,
}

/// The guidance state machine.
#[derive(Debug)]
pub struct GuidanceController {
    state: NavigationState,
    matcher: StepMatcher,
    decider: RerouteDecider,
    heading: HeadingEstimator,
    announcer: Announcer,
    limits: Limits,
    next_version: u64,
    next_ticket: u64,
    pending_reroute: Option<u64>,
}

impl GuidanceController {
    /// Create an idle controller.
    #[must_use]
    pub fn new(config: &Config, speaker: Arc<dyn Speaker>) -> Self {
        Self {
            state: NavigationState {
                audio_enabled: config.guidance.audio_enabled,
                ..NavigationState::default()
            },
            matcher: StepMatcher::new(config.guidance.hysteresis_meters),
            decider: RerouteDecider::new(
                config.reroute.deviation_threshold_meters,
                config.reroute.debounce_count,
            ),
            heading: HeadingEstimator::new(
                config.heading.smoothing_alpha,
                config.heading.noise_floor_meters,
            ),
            announcer: Announcer::new(speaker),
            limits: Limits {
                arrival_radius_m: config.guidance.arrival_radius_meters,
                max_failed_sessions: config.reroute.max_failed_sessions.max(1),
            },
            next_version: 1,
            next_ticket: 1,
            pending_reroute: None,
        }
    }

    /// Current state, borrowed.
    #[must_use]
    pub fn state(&self) -> &NavigationState {
        &self.state
    }

    /// Current state, cloned for hand-off to consumers.
    #[must_use]
    pub fn snapshot(&self) -> NavigationState {
        self.state.clone()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn status(&self) -> NavigationStatus {
        self.state.status
    }

    /// The reroute currently awaited, if any.
    #[must_use]
    pub fn pending_reroute(&self) -> Option<u64> {
        self.pending_reroute
    }

    /// Where a retried reroute should start from.
    #[must_use]
    pub fn retry_origin(&self) -> Option<LatLng> {
        self.state.last_fix.map(|f| f.position())
    }

    /// Turn spoken announcements on or off.
    pub fn set_audio_enabled(&mut self, enabled: bool) {
        self.state.audio_enabled = enabled;
        if !enabled {
            self.announcer.cancel();
        }
    }

    fn transition(&mut self, to: NavigationStatus, events: &mut Vec<GuidanceEvent>) {
        let from = self.state.status;
        if from == to {
            return;
        }
        info!(%from, %to, "Navigation state changed");
        self.state.status = to;
        events.push(GuidanceEvent::StatusChanged { from, to });
    }

    /// Replace the active route and reset per-route tracking.
    fn install(&mut self, route: Route) -> Arc<Route> {
        let route = Arc::new(route.with_version(self.next_version));
        self.next_version += 1;
        debug!(
            version = route.version(),
            steps = route.len(),
            fingerprint = %route.fingerprint(),
            "Installing route"
        );
        self.state.route = Some(Arc::clone(&route));
        self.state.current_step_index = 0;
        self.state.last_announced_index = None;
        self.state.deviation_meters = 0.0;
        self.state.consecutive_deviated_fixes = 0;
        self.decider.reset();
        self.announcer.reset();
        route
    }

    /// Load a route for a new session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] while navigating or rerouting.
    pub fn load_route(&mut self, route: Route) -> Result<Vec<GuidanceEvent>> {
        if matches!(
            self.state.status,
            NavigationStatus::Navigating | NavigationStatus::Rerouting
        ) {
            return Err(Error::invalid_transition("load a route", self.state.status));
        }
        let mut events = Vec::new();
        self.install(route);
        self.heading.reset();
        self.state.smoothed_bearing = None;
        self.state.last_fix = None;
        self.state.position_stale = false;
        self.state.failed_reroute_sessions = 0;
        self.pending_reroute = None;
        self.transition(NavigationStatus::RouteLoaded, &mut events);
        Ok(events)
    }

    /// Begin tracking.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DegenerateRoute`] if the route has no steps, or
    /// [`Error::InvalidTransition`] unless a route is loaded.
    pub fn start(&mut self) -> Result<Vec<GuidanceEvent>> {
        if self.state.status != NavigationStatus::RouteLoaded {
            return Err(Error::invalid_transition("start", self.state.status));
        }
        if self.state.route.as_ref().map_or(true, |r| r.is_empty()) {
            warn!("Refusing to start navigation on an empty route");
            return Err(Error::DegenerateRoute);
        }
        let mut events = Vec::new();
        self.transition(NavigationStatus::Navigating, &mut events);
        Ok(events)
    }

    /// Process one position fix.
    pub fn handle_fix(&mut self, fix: PositionFix) -> Vec<GuidanceEvent> {
        let mut events = Vec::new();

        match self.state.status {
            NavigationStatus::Navigating => {}
            NavigationStatus::Rerouting => {
                // Matching is suspended; keep the freshest origin for retries.
                if fix.validate().is_ok() {
                    self.note_fix_arrived(&mut events);
                    self.state.last_fix = Some(fix);
                }
                return events;
            }
            _ => return events,
        }

        if let Err(e) = fix.validate() {
            warn!(error = %e, "Discarding fix");
            events.push(GuidanceEvent::FixDiscarded {
                reason: e.to_string(),
            });
            return events;
        }

        let Some(route) = self.state.route.clone() else {
            return events;
        };
        self.note_fix_arrived(&mut events);

        let current = self.state.current_step_index;
        let index = self.matcher.match_step(&fix, &route, current);
        if index != current {
            debug!(from = current, to = index, "Step changed");
            self.state.current_step_index = index;
            events.push(GuidanceEvent::StepChanged {
                index,
                version: route.version(),
            });
        }

        let report = self.decider.update(&fix, &route, index);
        self.state.deviation_meters = report.deviation_meters;
        self.state.consecutive_deviated_fixes = report.consecutive_deviated_fixes;

        let prev = self.state.last_fix.replace(fix);
        self.state.smoothed_bearing = self.heading.estimate(prev.as_ref(), &fix);

        if report.should_reroute {
            let request = RerouteRequest {
                ticket: self.next_ticket,
                origin: fix.position(),
                destination: route.destination(),
            };
            self.next_ticket += 1;
            self.pending_reroute = Some(request.ticket);
            self.state.consecutive_deviated_fixes = 0;
            info!(
                ticket = request.ticket,
                deviation_m = report.deviation_meters,
                "Requesting reroute"
            );
            self.transition(NavigationStatus::Rerouting, &mut events);
            events.push(GuidanceEvent::RerouteRequested(request));
            return events;
        }

        if self.state.last_announced_index != Some(index) {
            if let Some(step) = route.step(index) {
                if let Some(text) =
                    self.announcer
                        .announce(step, route.version(), self.state.audio_enabled)
                {
                    events.push(GuidanceEvent::Announced { index, text });
                }
                self.state.last_announced_index = Some(index);
            }
        }

        if let Some(last) = route.steps().last() {
            let to_end = haversine(fix.position(), last.end_point);
            if index == last.index && to_end < self.limits.arrival_radius_m {
                info!(distance_m = to_end, "Arrived at destination");
                events.push(GuidanceEvent::Arrived);
                self.pending_reroute = None;
                self.transition(NavigationStatus::Stopped, &mut events);
            }
        }

        events
    }

    fn note_fix_arrived(&mut self, events: &mut Vec<GuidanceEvent>) {
        if self.state.position_stale {
            info!("Position fixes restored");
            self.state.position_stale = false;
            events.push(GuidanceEvent::PositionRestored);
        }
    }

    /// Process an error reported by the position source.
    ///
    /// Recoverable errors are surfaced only; an unrecoverable one ends an
    /// active session in [`NavigationStatus::Error`].
    pub fn handle_position_error(&mut self, error: &PositionError) -> Vec<GuidanceEvent> {
        let mut events = vec![GuidanceEvent::PositionUnavailable {
            message: error.to_string(),
        }];
        if error.is_fatal()
            && matches!(
                self.state.status,
                NavigationStatus::Navigating | NavigationStatus::Rerouting
            )
        {
            warn!(error = %error, "Position source failed");
            self.pending_reroute = None;
            self.announcer.cancel();
            self.transition(NavigationStatus::Error, &mut events);
        } else {
            debug!(error = %error, "Position temporarily unavailable");
        }
        events
    }

    /// Flag that no fix has arrived within the stale window.
    pub fn mark_position_stale(&mut self) -> Vec<GuidanceEvent> {
        let active = matches!(
            self.state.status,
            NavigationStatus::Navigating | NavigationStatus::Rerouting
        );
        if !active || self.state.position_stale {
            return Vec::new();
        }
        warn!("No position fix received recently");
        self.state.position_stale = true;
        vec![GuidanceEvent::PositionStale]
    }

    fn is_current_reroute(&self, ticket: u64) -> bool {
        self.state.status == NavigationStatus::Rerouting && self.pending_reroute == Some(ticket)
    }

    /// Install the route computed for reroute `ticket`.
    ///
    /// Results for stale tickets, or arriving after a stop, are ignored.
    pub fn reroute_succeeded(&mut self, ticket: u64, route: Route) -> Vec<GuidanceEvent> {
        if !self.is_current_reroute(ticket) {
            debug!(ticket, "Ignoring stale reroute result");
            return Vec::new();
        }
        if route.is_empty() {
            return self.reroute_failed(ticket, 1, "provider returned a route with no steps");
        }

        let mut events = Vec::new();
        let route = self.install(route);
        self.pending_reroute = None;
        self.state.failed_reroute_sessions = 0;
        info!(version = route.version(), steps = route.len(), "Rerouted");
        events.push(GuidanceEvent::Rerouted {
            version: route.version(),
            steps: route.len(),
        });
        self.transition(NavigationStatus::Navigating, &mut events);
        events
    }

    /// Record that reroute `ticket` gave up after `attempts` attempts.
    ///
    /// Guidance resumes on the stale route unless too many reroutes in a row
    /// have failed, in which case the session enters the error state.
    pub fn reroute_failed(
        &mut self,
        ticket: u64,
        attempts: u32,
        message: impl Into<String>,
    ) -> Vec<GuidanceEvent> {
        if !self.is_current_reroute(ticket) {
            debug!(ticket, "Ignoring stale reroute failure");
            return Vec::new();
        }
        let message = message.into();
        let mut events = Vec::new();
        self.pending_reroute = None;
        self.state.failed_reroute_sessions += 1;
        let failed_sessions = self.state.failed_reroute_sessions;
        warn!(
            attempts,
            failed_sessions,
            error = %message,
            "Reroute failed, keeping last known route"
        );
        events.push(GuidanceEvent::RerouteFailed {
            attempts,
            failed_sessions,
            message,
        });
        if failed_sessions >= self.limits.max_failed_sessions {
            self.announcer.cancel();
            self.transition(NavigationStatus::Error, &mut events);
        } else {
            self.transition(NavigationStatus::Navigating, &mut events);
        }
        events
    }

    /// Put the session in the error state, e.g. when tracking cannot begin.
    pub fn fail(&mut self, reason: &str) -> Vec<GuidanceEvent> {
        warn!(reason, "Navigation failed");
        let mut events = Vec::new();
        self.pending_reroute = None;
        self.announcer.cancel();
        self.transition(NavigationStatus::Error, &mut events);
        events
    }

    /// End the session from any state.
    pub fn stop(&mut self) -> Vec<GuidanceEvent> {
        let mut events = Vec::new();
        self.pending_reroute = None;
        self.announcer.cancel();
        self.transition(NavigationStatus::Stopped, &mut events);
        events
    }
}
