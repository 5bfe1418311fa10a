//! Position fixes delivered by a position source.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::geo::LatLng;

/// A single position reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
    /// Horizontal accuracy radius in meters.
    #[serde(default)]
    pub accuracy_meters: f64,
    /// Heading reported by the device, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading_degrees: Option<f64>,
    /// When the fix was taken, in milliseconds since the Unix epoch.
    #[serde(default)]
    pub timestamp_ms: i64,
}

impl PositionFix {
    /// Create a fix with no device heading.
    #[must_use]
    pub const fn new(lat: f64, lng: f64, accuracy_meters: f64, timestamp_ms: i64) -> Self {
        Self {
            lat,
            lng,
            accuracy_meters,
            heading_degrees: None,
            timestamp_ms,
        }
    }

    /// Create a fix at `point` with nominal accuracy.
    #[must_use]
    pub const fn at(point: LatLng, timestamp_ms: i64) -> Self {
        Self::new(point.lat, point.lng, 5.0, timestamp_ms)
    }

    /// Attach a device heading.
    #[must_use]
    pub const fn with_heading(mut self, heading_degrees: f64) -> Self {
        self.heading_degrees = Some(heading_degrees);
        self
    }

    /// The fix position.
    #[must_use]
    pub const fn position(&self) -> LatLng {
        LatLng::new(self.lat, self.lng)
    }

    /// Check the fix for NaN or out-of-range values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedFix`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(Error::malformed_fix(format!(
                "latitude {} out of range",
                self.lat
            )));
        }
        if !self.lng.is_finite() || !(-180.0..=180.0).contains(&self.lng) {
            return Err(Error::malformed_fix(format!(
                "longitude {} out of range",
                self.lng
            )));
        }
        if !self.accuracy_meters.is_finite() || self.accuracy_meters < 0.0 {
            return Err(Error::malformed_fix(format!(
                "accuracy {} is not a non-negative number",
                self.accuracy_meters
            )));
        }
        if let Some(heading) = self.heading_degrees {
            if !heading.is_finite() {
                return Err(Error::malformed_fix("heading is not finite"));
            }
        }
        Ok(())
    }
}
