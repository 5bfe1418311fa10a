//! Route provider abstraction.
//!
//! A [`RouteProvider`] turns an (origin, destination) pair into a [`Route`].
//! Providers do not retry; the guidance session owns retries and deadlines.

use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::geo::{bearing, haversine, LatLng};
use crate::route::{ManeuverKind, Route, Step};

/// Errors a route provider can report.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// No route exists between the points.
    #[error("no route found")]
    NotFound,

    /// The provider answered with an error.
    #[error("route provider error: {0}")]
    Provider(String),

    /// The provider returned a route with invalid geometry.
    #[error("invalid route geometry: {0}")]
    InvalidGeometry(String),

    /// The request did not complete before its deadline.
    #[error("route request timed out")]
    Timeout,
}

/// A trait for routing backends.
#[async_trait]
pub trait RouteProvider: Send + Sync + std::fmt::Debug {
    /// The name of this provider (for logging).
    fn name(&self) -> &'static str;

    /// Compute a route from `origin` to `destination`.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot produce a route.
    async fn compute_route(&self, origin: LatLng, destination: LatLng) -> Result<Route, RouteError>;
}

/// Check that every step of `route` has valid start and end coordinates.
///
/// # Errors
///
/// Returns [`RouteError::InvalidGeometry`] naming the first bad step.
pub fn validate_geometry(route: &Route) -> Result<(), RouteError> {
    if !route.destination().is_valid() {
        return Err(RouteError::InvalidGeometry(
            "destination out of range".to_string(),
        ));
    }
    for step in route.steps() {
        if !step.start_point.is_valid() || !step.end_point.is_valid() {
            return Err(RouteError::InvalidGeometry(format!(
                "step {} has invalid coordinates",
                step.index
            )));
        }
    }
    Ok(())
}

/// Default speed for the direct provider's duration estimates (30 km/h).
pub const DEFAULT_DIRECT_SPEED_MPS: f64 = 30.0 / 3.6;

/// Provider that routes in a straight line.
///
/// Produces a `straight` step from origin to destination followed by a
/// zero-length arrival step. Useful offline and as a reroute fallback.
#[derive(Debug, Clone, Copy)]
pub struct DirectRouteProvider {
    speed_mps: f64,
}

impl Default for DirectRouteProvider {
    fn default() -> Self {
        Self::new(DEFAULT_DIRECT_SPEED_MPS)
    }
}

impl DirectRouteProvider {
    /// Create a provider assuming the given travel speed.
    #[must_use]
    pub fn new(speed_mps: f64) -> Self {
        Self {
            speed_mps: if speed_mps > 0.0 {
                speed_mps
            } else {
                DEFAULT_DIRECT_SPEED_MPS
            },
        }
    }

    /// Build the straight-line route synchronously.
    #[must_use]
    pub fn route(&self, origin: LatLng, destination: LatLng) -> Route {
        let distance = haversine(origin, destination);
        let heading = compass_point(bearing(origin, destination));
        let steps = vec![
            Step::new(
                &format!("Head {heading} towards the destination"),
                ManeuverKind::Straight,
                origin,
                destination,
                distance,
                distance / self.speed_mps,
            ),
            Step::new(
                "You have arrived at your destination",
                ManeuverKind::Unknown,
                destination,
                destination,
                0.0,
                0.0,
            ),
        ];
        Route::new(steps, destination)
    }
}

fn compass_point(bearing: f64) -> &'static str {
    const POINTS: [&str; 8] = [
        "north",
        "northeast",
        "east",
        "southeast",
        "south",
        "southwest",
        "west",
        "northwest",
    ];
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let sector = ((bearing + 22.5) / 45.0).floor() as usize % POINTS.len();
    POINTS[sector]
}

#[async_trait]
impl RouteProvider for DirectRouteProvider {
    fn name(&self) -> &'static str {
        "direct"
    }

    async fn compute_route(&self, origin: LatLng, destination: LatLng) -> Result<Route, RouteError> {
        if !origin.is_valid() || !destination.is_valid() {
            return Err(RouteError::InvalidGeometry(
                "origin or destination out of range".to_string(),
            ));
        }
        Ok(self.route(origin, destination))
    }
}

/// Provider that never finds a route.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRouteProvider;

#[async_trait]
impl RouteProvider for NoRouteProvider {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn compute_route(&self, _origin: LatLng, _destination: LatLng) -> Result<Route, RouteError> {
        Err(RouteError::NotFound)
    }
}

/// Provider that serves a preloaded route once, then delegates.
///
/// Used to replay a recorded route while still being able to reroute.
#[derive(Debug)]
pub struct FixedRouteProvider<P> {
    initial: Mutex<Option<Route>>,
    fallback: P,
}

impl<P: RouteProvider> FixedRouteProvider<P> {
    /// Serve `route` on the first request, then ask `fallback`.
    #[must_use]
    pub fn new(route: Route, fallback: P) -> Self {
        Self {
            initial: Mutex::new(Some(route)),
            fallback,
        }
    }
}

#[async_trait]
impl<P: RouteProvider> RouteProvider for FixedRouteProvider<P> {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn compute_route(&self, origin: LatLng, destination: LatLng) -> Result<Route, RouteError> {
        let preloaded = self
            .initial
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(route) = preloaded {
            debug!(steps = route.len(), "Serving preloaded route");
            return Ok(route);
        }
        self.fallback.compute_route(origin, destination).await
    }
}
