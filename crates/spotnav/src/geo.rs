//! Geographic calculations for guidance.
//!
//! All coordinates are WGS84 latitude/longitude in degrees; all distances
//! are in meters.

use serde::{Deserialize, Serialize};

/// Earth radius in meters (WGS84 mean).
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    /// Latitude in degrees, positive north.
    pub lat: f64,
    /// Longitude in degrees, positive east.
    pub lng: f64,
}

impl LatLng {
    /// Create a new coordinate pair.
    #[must_use]
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Check that both components are finite and within WGS84 bounds.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

impl std::fmt::Display for LatLng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6},{:.6}", self.lat, self.lng)
    }
}

/// Result of projecting a point onto a segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentProjection {
    /// Nearest point on the segment.
    pub point: LatLng,
    /// Unclamped position along the segment (0 = start, 1 = end).
    pub t: f64,
    /// Distance from the point to the nearest point on the segment.
    pub distance_m: f64,
}

impl SegmentProjection {
    /// Whether the projection falls on the segment interior rather than
    /// before its start or past its end.
    #[must_use]
    pub fn is_within(&self) -> bool {
        (0.0..1.0 - 1e-9).contains(&self.t)
    }
}

/// Haversine distance between two points in meters.
#[must_use]
pub fn haversine(a: LatLng, b: LatLng) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlng = (b.lng - a.lng).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

/// Initial bearing from `a` to `b` in degrees [0, 360).
#[must_use]
pub fn bearing(a: LatLng, b: LatLng) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlng = (b.lng - a.lng).to_radians();

    let y = dlng.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlng.cos();

    wrap_360(y.atan2(x).to_degrees())
}

/// Midpoint of two points (planar interpolation, fine for short spans).
#[must_use]
pub fn midpoint(a: LatLng, b: LatLng) -> LatLng {
    LatLng::new((a.lat + b.lat) / 2.0, (a.lng + b.lng) / 2.0)
}

/// Project `p` onto the segment `a`→`b`.
///
/// Uses a planar approximation scaled by latitude cosine, which is accurate
/// enough for street-length segments. The returned point is clamped to the
/// segment; `t` is not.
#[must_use]
pub fn project_on_segment(p: LatLng, a: LatLng, b: LatLng) -> SegmentProjection {
    let cos_lat = ((a.lat + b.lat) / 2.0).to_radians().cos();

    let dx = (b.lng - a.lng) * cos_lat;
    let dy = b.lat - a.lat;
    let px = (p.lng - a.lng) * cos_lat;
    let py = p.lat - a.lat;

    let seg_len_sq = dx * dx + dy * dy;

    // Degenerate segment: every point projects onto its start.
    if seg_len_sq < 1e-20 {
        return SegmentProjection {
            point: a,
            t: 0.0,
            distance_m: haversine(p, a),
        };
    }

    let t = (px * dx + py * dy) / seg_len_sq;
    let clamped = t.clamp(0.0, 1.0);
    let point = LatLng::new(
        a.lat + clamped * (b.lat - a.lat),
        a.lng + clamped * (b.lng - a.lng),
    );

    SegmentProjection {
        point,
        t,
        distance_m: haversine(p, point),
    }
}

/// Wrap an angle to [0, 360).
#[must_use]
pub fn wrap_360(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Wrap an angle to [-180, 180).
#[must_use]
pub fn wrap_180(angle: f64) -> f64 {
    let wrapped = wrap_360(angle);
    if wrapped >= 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}
