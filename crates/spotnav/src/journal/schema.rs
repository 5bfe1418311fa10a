//! `SQLite` schema definitions for the session journal.

/// One row per navigation session.
pub const CREATE_SESSIONS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    destination_lat REAL NOT NULL,
    destination_lng REAL NOT NULL,
    route_fingerprint TEXT NOT NULL,
    step_count INTEGER NOT NULL,
    outcome TEXT
)
";

/// One row per guidance event.
pub const CREATE_EVENTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id INTEGER NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
    recorded_at TEXT NOT NULL,
    kind TEXT NOT NULL,
    step_index INTEGER,
    payload TEXT NOT NULL
)
";

/// Newest sessions first.
pub const CREATE_STARTED_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_sessions_started ON sessions(started_at DESC)
";

/// Events of a session in order.
pub const CREATE_EVENTS_SESSION_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_events_session ON events(session_id, id)
";

/// Key-value pairs, including the schema version.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_SESSIONS_TABLE,
    CREATE_EVENTS_TABLE,
    CREATE_STARTED_INDEX,
    CREATE_EVENTS_SESSION_INDEX,
    CREATE_METADATA_TABLE,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_reference_sessions() {
        assert!(CREATE_EVENTS_TABLE.contains("REFERENCES sessions(id)"));
        assert!(CREATE_EVENTS_TABLE.contains("payload TEXT NOT NULL"));
    }

    #[test]
    fn test_metadata_created_last() {
        assert_eq!(SCHEMA_STATEMENTS.last(), Some(&CREATE_METADATA_TABLE));
    }
}
