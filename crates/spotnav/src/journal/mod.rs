//! Session journal.
//!
//! `SQLite`-backed record of navigation sessions and the guidance events
//! they produced, for reviewing drives after the fact.

pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info};

use crate::controller::{GuidanceEvent, NavigationStatus};
use crate::error::{Error, Result};
use crate::geo::LatLng;
use crate::route::Route;

const MEMORY_PATH: &str = ":memory:";

/// A recorded navigation session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionRecord {
    /// Row id.
    pub id: i64,
    /// When the session began.
    pub started_at: DateTime<Utc>,
    /// When it ended; `None` while still running or if it never closed.
    pub ended_at: Option<DateTime<Utc>>,
    /// Where the session was headed.
    pub destination: LatLng,
    /// Fingerprint of the initial route.
    pub route_fingerprint: String,
    /// Steps in the initial route.
    pub step_count: usize,
    /// Final status, e.g. `stopped` or `error`.
    pub outcome: Option<String>,
}

/// A recorded guidance event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRecord {
    /// Row id.
    pub id: i64,
    /// Owning session.
    pub session_id: i64,
    /// When the event was recorded.
    pub recorded_at: DateTime<Utc>,
    /// Event kind, e.g. `announced`.
    pub kind: String,
    /// Step the event refers to, if any.
    pub step_index: Option<usize>,
    /// The full event as JSON.
    pub payload: serde_json::Value,
}

/// Journal statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JournalStats {
    /// Sessions recorded.
    pub total_sessions: i64,
    /// Events recorded.
    pub total_events: i64,
    /// Sessions that ended in arrival.
    pub arrivals: i64,
    /// Reroutes installed across all sessions.
    pub reroutes: i64,
    /// Start of the newest session.
    pub latest_session: Option<DateTime<Utc>>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}

/// The session journal.
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    conn: Connection,
}

fn parse_time(text: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(text).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

fn to_sql_int(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_sql_int(value: i64) -> usize {
    usize::try_from(value).unwrap_or_default()
}

impl Journal {
    /// Open or create a journal at `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!(path = %path.display(), "Opening journal");
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;",
        )?;
        migrations::initialize_schema(&conn)?;

        info!(path = %path.display(), "Journal opened");
        Ok(Self { path, conn })
    }

    /// Open a journal that lives only in memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(MEMORY_PATH),
            source,
        })?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(MEMORY_PATH),
            conn,
        })
    }

    /// Path of the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record the start of a session and return its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn begin_session(&self, destination: LatLng, route: &Route) -> Result<i64> {
        self.conn.execute(
            r"
            INSERT INTO sessions (started_at, destination_lat, destination_lng, route_fingerprint, step_count)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
            params![
                Utc::now().to_rfc3339(),
                destination.lat,
                destination.lng,
                route.fingerprint(),
                to_sql_int(route.len()),
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        debug!(session = id, "Journal session started");
        Ok(id)
    }

    /// Append `event` to session `session_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the event cannot be serialized or stored.
    pub fn record_event(&self, session_id: i64, event: &GuidanceEvent) -> Result<i64> {
        let payload = serde_json::to_string(event)?;
        self.conn.execute(
            r"
            INSERT INTO events (session_id, recorded_at, kind, step_index, payload)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
            params![
                session_id,
                Utc::now().to_rfc3339(),
                event.kind(),
                event.step_index().map(to_sql_int),
                payload,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Close session `session_id` with its final status.
    ///
    /// Returns `false` if no such session exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn end_session(&self, session_id: i64, outcome: NavigationStatus) -> Result<bool> {
        let affected = self.conn.execute(
            "UPDATE sessions SET ended_at = ?1, outcome = ?2 WHERE id = ?3",
            params![Utc::now().to_rfc3339(), outcome.to_string(), session_id],
        )?;
        if affected > 0 {
            debug!(session = session_id, %outcome, "Journal session ended");
        }
        Ok(affected > 0)
    }

    /// Get a session by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn session(&self, session_id: i64) -> Result<Option<SessionRecord>> {
        let record = self
            .conn
            .query_row(
                r"
                SELECT id, started_at, ended_at, destination_lat, destination_lng,
                       route_fingerprint, step_count, outcome
                FROM sessions WHERE id = ?1
                ",
                [session_id],
                Self::row_to_session,
            )
            .optional()?;
        Ok(record)
    }

    /// The most recent sessions, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn recent_sessions(&self, limit: usize) -> Result<Vec<SessionRecord>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT id, started_at, ended_at, destination_lat, destination_lng,
                   route_fingerprint, step_count, outcome
            FROM sessions ORDER BY started_at DESC, id DESC LIMIT ?1
            ",
        )?;
        let sessions = stmt
            .query_map([to_sql_int(limit)], Self::row_to_session)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    /// All events of a session, in recording order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn session_events(&self, session_id: i64) -> Result<Vec<EventRecord>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT id, session_id, recorded_at, kind, step_index, payload
            FROM events WHERE session_id = ?1 ORDER BY id ASC
            ",
        )?;
        let events = stmt
            .query_map([session_id], |row| {
                let recorded_at: String = row.get(2)?;
                let step_index: Option<i64> = row.get(4)?;
                let payload: String = row.get(5)?;
                Ok(EventRecord {
                    id: row.get(0)?,
                    session_id: row.get(1)?,
                    recorded_at: parse_time(&recorded_at),
                    kind: row.get(3)?,
                    step_index: step_index.map(from_sql_int),
                    payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(events)
    }

    /// Delete a session and its events.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn delete_session(&self, session_id: i64) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM sessions WHERE id = ?1", [session_id])?;
        Ok(affected > 0)
    }

    /// Journal statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails.
    pub fn stats(&self) -> Result<JournalStats> {
        let count = |sql: &str| -> Result<i64> {
            Ok(self.conn.query_row(sql, [], |row| row.get(0))?)
        };

        let total_sessions = count("SELECT COUNT(*) FROM sessions")?;
        let total_events = count("SELECT COUNT(*) FROM events")?;
        let arrivals = count("SELECT COUNT(DISTINCT session_id) FROM events WHERE kind = 'arrived'")?;
        let reroutes = count("SELECT COUNT(*) FROM events WHERE kind = 'rerouted'")?;

        let latest: Option<String> = self
            .conn
            .query_row(
                "SELECT started_at FROM sessions ORDER BY started_at DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        let db_size_bytes = if self.path == Path::new(MEMORY_PATH) {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(JournalStats {
            total_sessions,
            total_events,
            arrivals,
            reroutes,
            latest_session: latest.as_deref().map(parse_time),
            db_size_bytes,
        })
    }

    fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<SessionRecord> {
        let started_at: String = row.get(1)?;
        let ended_at: Option<String> = row.get(2)?;
        let step_count: i64 = row.get(6)?;
        Ok(SessionRecord {
            id: row.get(0)?,
            started_at: parse_time(&started_at),
            ended_at: ended_at.as_deref().map(parse_time),
            destination: LatLng::new(row.get(3)?, row.get(4)?),
            route_fingerprint: row.get(5)?,
            step_count: from_sql_int(step_count),
            outcome: row.get(7)?,
        })
    }
}
