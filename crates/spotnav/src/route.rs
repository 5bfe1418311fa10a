//! Route and step types.
//!
//! A [`Route`] is an ordered list of [`Step`]s produced by a route provider.
//! Routes are immutable once built; a reroute replaces the whole route with
//! a new one carrying a higher version.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::geo::LatLng;

/// Categorical description of the action at a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ManeuverKind {
    /// Continue straight.
    Straight,
    /// Turn left.
    TurnLeft,
    /// Turn right.
    TurnRight,
    /// Keep slightly left.
    SlightLeft,
    /// Keep slightly right.
    SlightRight,
    /// Sharp left.
    SharpLeft,
    /// Sharp right.
    SharpRight,
    /// U-turn to the left.
    UturnLeft,
    /// U-turn to the right.
    UturnRight,
    /// Roundabout, exit to the left.
    RoundaboutLeft,
    /// Roundabout, exit to the right.
    RoundaboutRight,
    /// Merge.
    Merge,
    /// Keep left at the fork.
    ForkLeft,
    /// Keep right at the fork.
    ForkRight,
    /// Take the ramp on the left.
    RampLeft,
    /// Take the ramp on the right.
    RampRight,
    /// Board the ferry.
    Ferry,
    /// Anything the provider reports that we do not recognise.
    #[default]
    #[serde(other)]
    Unknown,
}

impl ManeuverKind {
    /// Parse a provider maneuver name such as `turn-left` or `uturn-right`.
    ///
    /// Unrecognised or empty names map to [`ManeuverKind::Unknown`].
    #[must_use]
    pub fn from_provider(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "straight" => Self::Straight,
            "turn-left" => Self::TurnLeft,
            "turn-right" => Self::TurnRight,
            "turn-slight-left" | "slight-left" => Self::SlightLeft,
            "turn-slight-right" | "slight-right" => Self::SlightRight,
            "turn-sharp-left" | "sharp-left" => Self::SharpLeft,
            "turn-sharp-right" | "sharp-right" => Self::SharpRight,
            "uturn-left" | "u-turn-left" => Self::UturnLeft,
            "uturn-right" | "u-turn-right" => Self::UturnRight,
            "roundabout-left" => Self::RoundaboutLeft,
            "roundabout-right" => Self::RoundaboutRight,
            "merge" => Self::Merge,
            "fork-left" => Self::ForkLeft,
            "fork-right" => Self::ForkRight,
            "ramp-left" => Self::RampLeft,
            "ramp-right" => Self::RampRight,
            "ferry" => Self::Ferry,
            _ => Self::Unknown,
        }
    }

    /// Spoken phrase for this maneuver.
    #[must_use]
    pub fn phrase(self) -> &'static str {
        match self {
            Self::Straight => "continue straight",
            Self::TurnLeft => "turn left",
            Self::TurnRight => "turn right",
            Self::SlightLeft => "keep slightly left",
            Self::SlightRight => "keep slightly right",
            Self::SharpLeft => "turn sharp left",
            Self::SharpRight => "turn sharp right",
            Self::UturnLeft | Self::UturnRight => "make a U-turn",
            Self::RoundaboutLeft => "at the roundabout, take the exit on the left",
            Self::RoundaboutRight => "at the roundabout, take the exit on the right",
            Self::Merge => "merge",
            Self::ForkLeft => "keep left at the fork",
            Self::ForkRight => "keep right at the fork",
            Self::RampLeft => "take the ramp on the left",
            Self::RampRight => "take the ramp on the right",
            Self::Ferry => "take the ferry",
            Self::Unknown => "continue",
        }
    }
}

impl std::fmt::Display for ManeuverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Straight => "straight",
            Self::TurnLeft => "turn-left",
            Self::TurnRight => "turn-right",
            Self::SlightLeft => "slight-left",
            Self::SlightRight => "slight-right",
            Self::SharpLeft => "sharp-left",
            Self::SharpRight => "sharp-right",
            Self::UturnLeft => "uturn-left",
            Self::UturnRight => "uturn-right",
            Self::RoundaboutLeft => "roundabout-left",
            Self::RoundaboutRight => "roundabout-right",
            Self::Merge => "merge",
            Self::ForkLeft => "fork-left",
            Self::ForkRight => "fork-right",
            Self::RampLeft => "ramp-left",
            Self::RampRight => "ramp-right",
            Self::Ferry => "ferry",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// A single step of a route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Position of this step in the route (0-based).
    pub index: usize,
    /// Plain-text instruction, safe to speak.
    pub instruction_text: String,
    /// The provider's original instruction, possibly with markup. Display only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rich_instruction: Option<String>,
    /// What the driver does at this step.
    pub maneuver: ManeuverKind,
    /// Where the step begins.
    pub start_point: LatLng,
    /// Where the step ends.
    pub end_point: LatLng,
    /// Length of the step.
    pub distance_meters: f64,
    /// Expected travel time of the step.
    pub duration_seconds: f64,
}

impl Step {
    /// Create a step, sanitizing the instruction text.
    ///
    /// The index is provisional; [`Route::new`] renumbers steps in travel
    /// order.
    #[must_use]
    pub fn new(
        instruction: &str,
        maneuver: ManeuverKind,
        start_point: LatLng,
        end_point: LatLng,
        distance_meters: f64,
        duration_seconds: f64,
    ) -> Self {
        let instruction_text = strip_markup(instruction);
        let rich_instruction = (instruction_text != instruction).then(|| instruction.to_string());
        Self {
            index: 0,
            instruction_text,
            rich_instruction,
            maneuver,
            start_point,
            end_point,
            distance_meters,
            duration_seconds,
        }
    }
}

/// Step as it appears in a route file, before sanitizing and numbering.
#[derive(Debug, Clone, Deserialize)]
struct StepRecord {
    #[serde(alias = "instruction_text", alias = "html_instructions")]
    instruction: String,
    #[serde(default)]
    maneuver: String,
    #[serde(alias = "start_point")]
    start: LatLng,
    #[serde(alias = "end_point")]
    end: LatLng,
    #[serde(default)]
    distance_meters: f64,
    #[serde(default)]
    duration_seconds: f64,
}

/// Route as it appears in a route file.
#[derive(Debug, Clone, Deserialize)]
struct RouteRecord {
    destination: Option<LatLng>,
    steps: Vec<StepRecord>,
}

/// An immutable route: steps in travel order plus totals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Route {
    steps: Vec<Step>,
    destination: LatLng,
    total_distance_meters: f64,
    total_duration_seconds: f64,
    version: u64,
}

impl Route {
    /// Build a route from steps in travel order.
    ///
    /// Step indices are reassigned to match their position. The version
    /// starts at 0; the controller stamps installed routes.
    #[must_use]
    pub fn new(steps: Vec<Step>, destination: LatLng) -> Self {
        let steps: Vec<Step> = steps
            .into_iter()
            .enumerate()
            .map(|(index, step)| Step { index, ..step })
            .collect();
        let total_distance_meters = steps.iter().map(|s| s.distance_meters).sum();
        let total_duration_seconds = steps.iter().map(|s| s.duration_seconds).sum();
        Self {
            steps,
            destination,
            total_distance_meters,
            total_duration_seconds,
            version: 0,
        }
    }

    /// Parse a route from provider-style JSON.
    ///
    /// The destination defaults to the last step's end point.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or has neither steps nor a
    /// destination.
    pub fn from_json(json: &str) -> Result<Self> {
        let record: RouteRecord = serde_json::from_str(json)?;
        let destination = record
            .destination
            .or_else(|| record.steps.last().map(|s| s.end))
            .ok_or(crate::error::Error::DegenerateRoute)?;
        let steps = record
            .steps
            .into_iter()
            .map(|s| {
                Step::new(
                    &s.instruction,
                    ManeuverKind::from_provider(&s.maneuver),
                    s.start,
                    s.end,
                    s.distance_meters,
                    s.duration_seconds,
                )
            })
            .collect();
        Ok(Self::new(steps, destination))
    }

    /// Return this route stamped with the given version.
    #[must_use]
    pub fn with_version(self, version: u64) -> Self {
        Self { version, ..self }
    }

    /// Steps in travel order.
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Step at `index`, if any.
    #[must_use]
    pub fn step(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    /// Number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the route has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The final destination the route leads to.
    #[must_use]
    pub fn destination(&self) -> LatLng {
        self.destination
    }

    /// Sum of step distances.
    #[must_use]
    pub fn total_distance_meters(&self) -> f64 {
        self.total_distance_meters
    }

    /// Sum of step durations.
    #[must_use]
    pub fn total_duration_seconds(&self) -> f64 {
        self.total_duration_seconds
    }

    /// Monotonic version, bumped on every reroute.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Distance and duration left from the start of step `index`.
    #[must_use]
    pub fn remaining_from(&self, index: usize) -> RouteSummary {
        let rest = self.steps.get(index..).unwrap_or(&[]);
        RouteSummary {
            distance_meters: rest.iter().map(|s| s.distance_meters).sum(),
            duration_seconds: rest.iter().map(|s| s.duration_seconds).sum(),
        }
    }

    /// BLAKE3 fingerprint over step geometry and instructions.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for step in &self.steps {
            for value in [
                step.start_point.lat,
                step.start_point.lng,
                step.end_point.lat,
                step.end_point.lng,
            ] {
                hasher.update(&value.to_le_bytes());
            }
            hasher.update(step.instruction_text.as_bytes());
        }
        hasher.update(&self.destination.lat.to_le_bytes());
        hasher.update(&self.destination.lng.to_le_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

/// Remaining distance and time, as shown in the route info panel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RouteSummary {
    /// Meters left to drive.
    pub distance_meters: f64,
    /// Seconds left to drive.
    pub duration_seconds: f64,
}

impl std::fmt::Display for RouteSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Distance: {}, estimated time: {}",
            format_distance(self.distance_meters),
            format_duration(self.duration_seconds)
        )
    }
}

fn tag_regex() -> &'static Regex {
    static TAGS: OnceLock<Regex> = OnceLock::new();
    TAGS.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("Invalid regex pattern"))
}

fn whitespace_regex() -> &'static Regex {
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();
    WHITESPACE.get_or_init(|| Regex::new(r"\s+").expect("Invalid regex pattern"))
}

/// Reduce provider instruction markup to speakable plain text.
///
/// Tags are replaced by a space, the common HTML entities are decoded and
/// whitespace is collapsed.
#[must_use]
pub fn strip_markup(text: &str) -> String {
    let without_tags = tag_regex().replace_all(text, " ");
    let decoded = without_tags
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        // last, so "&amp;lt;" stays literal "&lt;"
        .replace("&amp;", "&");
    let collapsed = whitespace_regex().replace_all(&decoded, " ");
    collapsed.trim().to_string()
}

/// Format a distance for display and speech.
///
/// Meters are rounded to the nearest 10; a kilometer or more shows one
/// decimal.
#[must_use]
pub fn format_distance(meters: f64) -> String {
    if meters >= 1000.0 {
        format!("{:.1} km", meters / 1000.0)
    } else {
        #[allow(clippy::cast_possible_truncation)]
        let rounded = (meters / 10.0).round() as i64 * 10;
        format!("{rounded} m")
    }
}

/// Format a duration as minutes, or hours and minutes.
#[must_use]
pub fn format_duration(seconds: f64) -> String {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let minutes = (seconds.max(0.0) / 60.0).round() as u64;
    if minutes >= 60 {
        format!("{} h {} min", minutes / 60, minutes % 60)
    } else {
        format!("{minutes} min")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(instruction: &str, start: (f64, f64), end: (f64, f64), dist: f64) -> Step {
        Step::new(
            instruction,
            ManeuverKind::Straight,
            LatLng::new(start.0, start.1),
            LatLng::new(end.0, end.1),
            dist,
            dist / 10.0,
        )
    }

    #[test]
    fn test_strip_markup_removes_tags() {
        assert_eq!(
            strip_markup("Turn <b>left</b> onto <b>Av. Providencia</b>"),
            "Turn left onto Av. Providencia"
        );
    }

    #[test]
    fn test_strip_markup_block_tags_and_entities() {
        let html = "Turn right<div style=\"font-size:0.9em\">Destination will be on the&nbsp;left</div>";
        assert_eq!(
            strip_markup(html),
            "Turn right Destination will be on the left"
        );
        assert_eq!(strip_markup("Salt &amp; Pepper St"), "Salt & Pepper St");
        assert_eq!(strip_markup("&amp;lt;"), "&lt;");
    }

    #[test]
    fn test_step_new_keeps_rich_text_only_when_changed() {
        let plain = step("Head north", (0.0, 0.0), (0.001, 0.0), 100.0);
        assert!(plain.rich_instruction.is_none());

        let rich = step("Head <b>north</b>", (0.0, 0.0), (0.001, 0.0), 100.0);
        assert_eq!(rich.instruction_text, "Head north");
        assert_eq!(rich.rich_instruction.as_deref(), Some("Head <b>north</b>"));
    }

    #[test]
    fn test_route_new_renumbers_and_totals() {
        let route = Route::new(
            vec![
                step("a", (0.0, 0.0), (0.0, 0.001), 100.0),
                step("b", (0.0, 0.001), (0.0, 0.002), 150.0),
            ],
            LatLng::new(0.0, 0.002),
        );
        assert_eq!(route.len(), 2);
        assert_eq!(route.steps()[1].index, 1);
        assert!((route.total_distance_meters() - 250.0).abs() < 1e-9);
        assert!((route.total_duration_seconds() - 25.0).abs() < 1e-9);
        assert_eq!(route.version(), 0);
        assert_eq!(route.with_version(4).version(), 4);
    }

    #[test]
    fn test_remaining_from() {
        let route = Route::new(
            vec![
                step("a", (0.0, 0.0), (0.0, 0.001), 100.0),
                step("b", (0.0, 0.001), (0.0, 0.002), 150.0),
            ],
            LatLng::new(0.0, 0.002),
        );
        let rest = route.remaining_from(1);
        assert!((rest.distance_meters - 150.0).abs() < 1e-9);
        assert_eq!(route.remaining_from(9).distance_meters, 0.0);
    }

    #[test]
    fn test_fingerprint_changes_with_geometry() {
        let a = Route::new(
            vec![step("a", (0.0, 0.0), (0.0, 0.001), 100.0)],
            LatLng::new(0.0, 0.001),
        );
        let b = Route::new(
            vec![step("a", (0.0, 0.0), (0.0, 0.002), 100.0)],
            LatLng::new(0.0, 0.002),
        );
        assert_eq!(a.fingerprint(), a.clone().with_version(3).fingerprint());
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_from_json() {
        let json = r#"{
            "steps": [
                {"instruction": "Head <b>east</b>", "maneuver": "straight",
                 "start": {"lat": 0.0, "lng": 0.0}, "end": {"lat": 0.0, "lng": 0.001},
                 "distance_meters": 111.0, "duration_seconds": 12.0},
                {"html_instructions": "Turn left", "maneuver": "turn-left",
                 "start_point": {"lat": 0.0, "lng": 0.001}, "end_point": {"lat": 0.001, "lng": 0.001}}
            ]
        }"#;
        let route = Route::from_json(json).unwrap();
        assert_eq!(route.len(), 2);
        assert_eq!(route.steps()[0].instruction_text, "Head east");
        assert_eq!(route.steps()[1].maneuver, ManeuverKind::TurnLeft);
        assert_eq!(route.destination(), LatLng::new(0.001, 0.001));
    }

    #[test]
    fn test_from_json_empty_without_destination_fails() {
        assert!(Route::from_json(r#"{"steps": []}"#).is_err());
        let route = Route::from_json(r#"{"steps": [], "destination": {"lat": 1.0, "lng": 2.0}}"#)
            .unwrap();
        assert!(route.is_empty());
    }

    #[test]
    fn test_maneuver_from_provider() {
        assert_eq!(ManeuverKind::from_provider("turn-left"), ManeuverKind::TurnLeft);
        assert_eq!(ManeuverKind::from_provider("TURN_SLIGHT_RIGHT"), ManeuverKind::SlightRight);
        assert_eq!(ManeuverKind::from_provider("uturn-left"), ManeuverKind::UturnLeft);
        assert_eq!(ManeuverKind::from_provider("roundabout-right"), ManeuverKind::RoundaboutRight);
        assert_eq!(ManeuverKind::from_provider(""), ManeuverKind::Unknown);
        assert_eq!(ManeuverKind::from_provider("keep-left"), ManeuverKind::Unknown);
    }

    #[test]
    fn test_maneuver_serde_names() {
        let json = serde_json::to_string(&ManeuverKind::RoundaboutLeft).unwrap();
        assert_eq!(json, "\"roundabout-left\"");
        let parsed: ManeuverKind = serde_json::from_str("\"something-new\"").unwrap();
        assert_eq!(parsed, ManeuverKind::Unknown);
        assert_eq!(ManeuverKind::ForkRight.to_string(), "fork-right");
    }

    #[test]
    fn test_format_distance() {
        assert_eq!(format_distance(0.0), "0 m");
        assert_eq!(format_distance(244.0), "240 m");
        assert_eq!(format_distance(1500.0), "1.5 km");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(90.0), "2 min");
        assert_eq!(format_duration(3900.0), "1 h 5 min");
    }

    #[test]
    fn test_route_summary_display() {
        let summary = RouteSummary {
            distance_meters: 2500.0,
            duration_seconds: 600.0,
        };
        assert_eq!(summary.to_string(), "Distance: 2.5 km, estimated time: 10 min");
    }
}
