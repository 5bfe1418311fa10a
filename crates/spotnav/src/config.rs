//! Configuration management for spotnav.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::source::WatchOptions;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "spotnav";

/// Default journal database file name.
const DATABASE_FILE_NAME: &str = "journal.db";

/// Prefix for environment overrides, e.g. `SPOTNAV_REROUTE__DEBOUNCE_COUNT=5`.
const ENV_PREFIX: &str = "SPOTNAV_";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `SPOTNAV_`, sections split on `__`)
/// 2. TOML config file at `~/.config/spotnav/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Step matching, announcements and arrival.
    pub guidance: GuidanceConfig,
    /// Off-route detection and route recomputation.
    pub reroute: RerouteConfig,
    /// Marker bearing smoothing.
    pub heading: HeadingConfig,
    /// Position source behavior.
    pub position: PositionConfig,
    /// Session journal.
    pub journal: JournalConfig,
}

/// Guidance configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuidanceConfig {
    /// Speak announcements.
    pub audio_enabled: bool,
    /// Distance to the final step's end that counts as arrival.
    pub arrival_radius_meters: f64,
    /// Margin a later step must win by before the matcher advances.
    pub hysteresis_meters: f64,
}

/// Reroute configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RerouteConfig {
    /// Distance from the route beyond which a fix counts as off-route.
    pub deviation_threshold_meters: f64,
    /// Off-route fixes in a row needed to request a reroute.
    pub debounce_count: u32,
    /// Provider attempts per reroute.
    pub max_retries: u32,
    /// Delay before the second attempt; doubles for each later one.
    pub backoff_base_ms: u64,
    /// Deadline for a single provider call.
    pub deadline_ms: u64,
    /// Failed reroutes in a row before the session gives up.
    pub max_failed_sessions: u32,
}

/// Heading configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadingConfig {
    /// Weight of the newest bearing, in `(0, 1]`.
    pub smoothing_alpha: f64,
    /// Displacement below which fix-to-fix bearings are ignored.
    pub noise_floor_meters: f64,
}

/// Position source configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionConfig {
    /// Seconds without a fix before the position is flagged stale.
    pub stale_after_secs: u64,
    /// Ask the platform for its most accurate fixes.
    pub high_accuracy: bool,
    /// Oldest cached fix the platform may return, in milliseconds.
    pub maximum_age_ms: u64,
    /// How long the platform may take to produce a fix, in milliseconds.
    pub timeout_ms: u64,
}

/// Journal configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    /// Record sessions and their events.
    pub enabled: bool,
    /// Path to the database file.
    /// Defaults to `~/.local/share/spotnav/journal.db`
    pub database_path: Option<PathBuf>,
}

impl Default for GuidanceConfig {
    fn default() -> Self {
        Self {
            audio_enabled: true,
            arrival_radius_meters: 20.0,
            hysteresis_meters: 5.0,
        }
    }
}

impl Default for RerouteConfig {
    fn default() -> Self {
        Self {
            deviation_threshold_meters: 50.0,
            debounce_count: 3,
            max_retries: 3,
            backoff_base_ms: 1000,
            deadline_ms: 8000,
            max_failed_sessions: 3,
        }
    }
}

impl Default for HeadingConfig {
    fn default() -> Self {
        Self {
            smoothing_alpha: 0.3,
            noise_floor_meters: 2.0,
        }
    }
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: 10,
            high_accuracy: true,
            maximum_age_ms: 1000,
            timeout_ms: 5000,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a TOML document on top of the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the document does not parse or validate.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::string(toml))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        positive("guidance.arrival_radius_meters", self.guidance.arrival_radius_meters)?;
        non_negative("guidance.hysteresis_meters", self.guidance.hysteresis_meters)?;
        positive(
            "reroute.deviation_threshold_meters",
            self.reroute.deviation_threshold_meters,
        )?;
        non_negative("heading.noise_floor_meters", self.heading.noise_floor_meters)?;

        let alpha = self.heading.smoothing_alpha;
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(invalid(format!(
                "heading.smoothing_alpha ({alpha}) must be in (0, 1]"
            )));
        }

        for (name, value) in [
            ("reroute.debounce_count", u64::from(self.reroute.debounce_count)),
            ("reroute.max_retries", u64::from(self.reroute.max_retries)),
            (
                "reroute.max_failed_sessions",
                u64::from(self.reroute.max_failed_sessions),
            ),
            ("reroute.deadline_ms", self.reroute.deadline_ms),
            ("position.stale_after_secs", self.position.stale_after_secs),
        ] {
            if value == 0 {
                return Err(invalid(format!("{name} must be greater than 0")));
            }
        }

        Ok(())
    }

    /// Get the journal database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.journal
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Deadline for a single provider call.
    #[must_use]
    pub fn reroute_deadline(&self) -> Duration {
        Duration::from_millis(self.reroute.deadline_ms)
    }

    /// Delay before reroute attempt `attempt` (1-based); zero for the first.
    #[must_use]
    pub fn reroute_backoff(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 1u64 << (attempt - 2).min(16);
        Duration::from_millis(self.reroute.backoff_base_ms.saturating_mul(factor))
    }

    /// Time without a fix before the position is flagged stale.
    #[must_use]
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.position.stale_after_secs)
    }

    /// Options for a platform geolocation watch.
    #[must_use]
    pub fn watch_options(&self) -> WatchOptions {
        WatchOptions {
            high_accuracy: self.position.high_accuracy,
            maximum_age: Duration::from_millis(self.position.maximum_age_ms),
            timeout: Duration::from_millis(self.position.timeout_ms),
        }
    }
}

fn invalid(message: String) -> Error {
    Error::ConfigValidation { message }
}

fn positive(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(format!("{name} must be greater than 0 (got {value})")))
    }
}

fn non_negative(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(invalid(format!("{name} must not be negative (got {value})")))
    }
}

/// Whether a config file exists at `path`.
#[must_use]
pub fn config_file_exists(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert!(config.guidance.audio_enabled);
        assert!(!config.journal.enabled);
        assert_eq!(config.reroute.debounce_count, 3);
        assert_eq!(config.reroute.max_failed_sessions, 3);
    }

    #[test]
    fn test_default_guidance_config() {
        let guidance = GuidanceConfig::default();

        assert_eq!(guidance.arrival_radius_meters, 20.0);
        assert_eq!(guidance.hysteresis_meters, 5.0);
    }

    #[test]
    fn test_default_reroute_config() {
        let reroute = RerouteConfig::default();

        assert_eq!(reroute.deviation_threshold_meters, 50.0);
        assert_eq!(reroute.max_retries, 3);
        assert_eq!(reroute.backoff_base_ms, 1000);
        assert_eq!(reroute.deadline_ms, 8000);
    }

    #[test]
    fn test_default_position_config() {
        let position = PositionConfig::default();

        assert_eq!(position.stale_after_secs, 10);
        assert!(position.high_accuracy);
        assert_eq!(position.maximum_age_ms, 1000);
        assert_eq!(position.timeout_ms, 5000);
    }

    #[test]
    fn test_validate_valid_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_debounce() {
        let mut config = Config::default();
        config.reroute.debounce_count = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("debounce_count"));
    }

    #[test]
    fn test_validate_alpha_out_of_range() {
        let mut config = Config::default();
        config.heading.smoothing_alpha = 1.5;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("smoothing_alpha"));
    }

    #[test]
    fn test_validate_negative_hysteresis() {
        let mut config = Config::default();
        config.guidance.hysteresis_meters = -1.0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("hysteresis_meters"));
    }

    #[test]
    fn test_validate_nan_threshold() {
        let mut config = Config::default();
        config.reroute.deviation_threshold_meters = f64::NAN;

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_database_path_default() {
        let config = Config::default();
        let path = config.database_path();

        assert!(path.to_string_lossy().contains("journal.db"));
    }

    #[test]
    fn test_database_path_custom() {
        let mut config = Config::default();
        config.journal.database_path = Some(PathBuf::from("/custom/path/db.sqlite"));

        assert_eq!(
            config.database_path(),
            PathBuf::from("/custom/path/db.sqlite")
        );
    }

    #[test]
    fn test_reroute_backoff_doubles() {
        let config = Config::default();

        assert_eq!(config.reroute_backoff(1), Duration::ZERO);
        assert_eq!(config.reroute_backoff(2), Duration::from_millis(1000));
        assert_eq!(config.reroute_backoff(3), Duration::from_millis(2000));
        assert_eq!(config.reroute_backoff(4), Duration::from_millis(4000));
    }

    #[test]
    fn test_default_reroute_schedule() {
        let config = Config::default();
        let waits: Vec<Duration> = (1..=config.reroute.max_retries)
            .map(|attempt| config.reroute_backoff(attempt))
            .collect();
        assert_eq!(
            waits,
            [Duration::ZERO, Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[test]
    fn test_durations() {
        let config = Config::default();

        assert_eq!(config.reroute_deadline(), Duration::from_secs(8));
        assert_eq!(config.stale_after(), Duration::from_secs(10));
        assert_eq!(config.watch_options(), WatchOptions::default());
    }

    #[test]
    fn test_default_config_path() {
        let path = Config::default_config_path();
        assert!(path.to_string_lossy().contains("spotnav"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    fn test_load_nonexistent_config() {
        let result = Config::load_from(Some(PathBuf::from("/nonexistent/config.toml")));
        assert!(result.is_ok());
        assert!(!config_file_exists(Path::new("/nonexistent/config.toml")));
    }

    #[test]
    fn test_from_toml_str_overrides_section() {
        let config = Config::from_toml_str(
            r"
            [reroute]
            debounce_count = 5

            [guidance]
            audio_enabled = false
            ",
        )
        .unwrap();

        assert_eq!(config.reroute.debounce_count, 5);
        assert_eq!(config.reroute.max_retries, 3);
        assert!(!config.guidance.audio_enabled);
    }

    #[test]
    fn test_from_toml_str_rejects_invalid() {
        let result = Config::from_toml_str("[heading]\nsmoothing_alpha = 2.0\n");
        assert!(matches!(result, Err(Error::ConfigValidation { .. })));
    }

    #[test]
    fn test_config_serialize() {
        let json = serde_json::to_string(&Config::default()).unwrap();
        assert!(json.contains("deviation_threshold_meters"));
    }

    #[test]
    fn test_config_deserialize_partial() {
        let json = r#"{"guidance": {"arrival_radius_meters": 35.0}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.guidance.arrival_radius_meters, 35.0);
        assert_eq!(config.guidance.hysteresis_meters, 5.0);
    }
}
