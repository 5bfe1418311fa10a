//! Error types for spotnav.
//!
//! This module defines the error types used throughout the guidance engine.
//! Collaborator boundaries (route provider, position source, speaker) have
//! their own narrow error enums. Speech failures never leave the announcer,
//! so only route and position errors become an [`Error`].

use std::path::PathBuf;
use thiserror::Error;

use crate::controller::NavigationStatus;
use crate::provider::RouteError;
use crate::source::PositionError;

/// The main error type for spotnav operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Guidance Errors ===
    /// The position source could not deliver a fix.
    #[error("position unavailable: {message}")]
    PositionUnavailable {
        /// Description of what went wrong.
        message: String,
    },

    /// The route provider failed after every retry.
    #[error("route computation failed after {attempts} attempt(s): {message}")]
    RouteComputationFailed {
        /// Number of attempts made.
        attempts: u32,
        /// The last provider error.
        message: String,
    },

    /// A position fix had invalid coordinates or accuracy.
    #[error("malformed fix: {reason}")]
    MalformedFix {
        /// Why the fix was rejected.
        reason: String,
    },

    /// The route has no steps and cannot be navigated.
    #[error("route has no steps")]
    DegenerateRoute,

    /// An operation was attempted in a state that does not allow it.
    #[error("cannot {operation} while {status}")]
    InvalidTransition {
        /// The attempted operation.
        operation: &'static str,
        /// The state the controller was in.
        status: NavigationStatus,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Journal Errors ===
    /// Failed to open or create the journal database.
    #[error("failed to open journal at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A journal query failed.
    #[error("journal query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run journal migrations.
    #[error("journal migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A specialized Result type for spotnav operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl From<PositionError> for Error {
    fn from(err: PositionError) -> Self {
        Self::PositionUnavailable {
            message: err.to_string(),
        }
    }
}

impl Error {
    /// Create a route computation error from the provider's last error.
    #[must_use]
    pub fn route_computation_failed(attempts: u32, last: &RouteError) -> Self {
        Self::RouteComputationFailed {
            attempts,
            message: last.to_string(),
        }
    }

    /// Create a malformed fix error.
    #[must_use]
    pub fn malformed_fix(reason: impl Into<String>) -> Self {
        Self::MalformedFix {
            reason: reason.into(),
        }
    }

    /// Create an invalid transition error.
    #[must_use]
    pub fn invalid_transition(operation: &'static str, status: NavigationStatus) -> Self {
        Self::InvalidTransition { operation, status }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::DegenerateRoute;
        assert_eq!(err.to_string(), "route has no steps");
    }

    #[test]
    fn test_malformed_fix_display() {
        let err = Error::malformed_fix("latitude is NaN");
        assert_eq!(err.to_string(), "malformed fix: latitude is NaN");
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = Error::invalid_transition("start", NavigationStatus::Idle);
        assert_eq!(err.to_string(), "cannot start while idle");
    }

    #[test]
    fn test_route_computation_failed_keeps_last_error() {
        let err = Error::route_computation_failed(3, &RouteError::Timeout);
        assert!(matches!(err, Error::RouteComputationFailed { attempts: 3, .. }));

        let err = Error::route_computation_failed(2, &RouteError::Provider("quota exceeded".to_string()));
        assert!(err.to_string().contains("2 attempt"));
        assert!(err.to_string().contains("quota exceeded"));
    }

    #[test]
    fn test_from_position_error() {
        let err: Error = PositionError::PermissionDenied.into();
        assert!(matches!(err, Error::PositionUnavailable { .. }));
        assert!(err.to_string().contains("permission"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_json_error() {
        let json_result: std::result::Result<i32, serde_json::Error> =
            serde_json::from_str("not valid json");
        if let Err(json_err) = json_result {
            let err: Error = json_err.into();
            assert!(matches!(err, Error::Json(_)));
        }
    }

    #[test]
    fn test_route_computation_failed_display() {
        let err = Error::RouteComputationFailed {
            attempts: 3,
            message: "network down".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("3 attempt"));
        assert!(msg.contains("network down"));
    }

    #[test]
    fn test_config_validation_error_display() {
        let err = Error::ConfigValidation {
            message: "debounce_count must be greater than 0".to_string(),
        };
        assert!(err.to_string().contains("debounce_count"));
    }

    #[test]
    fn test_database_open_error_display() {
        let result = rusqlite::Connection::open_with_flags(
            "/nonexistent/path/journal.db",
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
        );
        if let Err(sqlite_err) = result {
            let err = Error::DatabaseOpen {
                path: PathBuf::from("/nonexistent/path/journal.db"),
                source: sqlite_err,
            };
            assert!(err.to_string().contains("/nonexistent/path/journal.db"));
        }
    }
}
