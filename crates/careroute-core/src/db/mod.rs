//! Database layer for careroute.

mod care_team;
mod cases;
mod directory;
mod eligibility;
mod locks;
mod notifications;
mod queue;
mod schema;

pub use schema::*;

use std::cell::Cell;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Type, ValueRef};
use rusqlite::{Connection, Row};
use thiserror::Error;

use crate::models::{
    AssignmentId, CareProvidingStateId, CaseId, PathwayId, PatientId, ProviderId, QueueItemId,
    UnknownLabel, VisitId,
};

/// Database errors.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Stale write: {0}")]
    Conflict(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Database connection wrapper.
pub struct Database {
    conn: Connection,
    depth: Cell<u32>,
}

impl Database {
    /// Open database at path, creating if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(StdDuration::from_secs(5))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        let db = Self {
            conn,
            depth: Cell::new(0),
        };
        db.initialize()?;
        Ok(db)
    }

    /// Create in-memory database (for testing).
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn,
            depth: Cell::new(0),
        };
        db.initialize()?;
        Ok(db)
    }

    /// Initialize schema.
    fn initialize(&self) -> DbResult<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Get raw connection (for advanced queries).
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Begin a unit of work.
    ///
    /// The outermost guard takes the write lock up front with `BEGIN IMMEDIATE`
    /// so concurrent writers queue on the busy timeout instead of failing on
    /// upgrade. Nested guards become savepoints.
    pub fn begin(&self) -> DbResult<TxGuard<'_>> {
        let level = self.depth.get();
        if level == 0 {
            self.conn.execute_batch("BEGIN IMMEDIATE")?;
        } else {
            self.conn.execute_batch(&format!("SAVEPOINT sp_{}", level))?;
        }
        self.depth.set(level + 1);
        Ok(TxGuard {
            db: self,
            level,
            finished: false,
        })
    }
}

/// Open transaction or savepoint. Rolls back on drop unless committed.
pub struct TxGuard<'a> {
    db: &'a Database,
    level: u32,
    finished: bool,
}

impl TxGuard<'_> {
    pub fn commit(mut self) -> DbResult<()> {
        let sql = if self.level == 0 {
            "COMMIT".to_string()
        } else {
            format!("RELEASE sp_{}", self.level)
        };
        self.db.conn.execute_batch(&sql)?;
        self.finish();
        Ok(())
    }

    fn finish(&mut self) {
        self.finished = true;
        self.db.depth.set(self.level);
    }
}

impl Drop for TxGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let sql = if self.level == 0 {
            "ROLLBACK".to_string()
        } else {
            format!("ROLLBACK TO sp_{0}; RELEASE sp_{0}", self.level)
        };
        if let Err(e) = self.db.conn.execute_batch(&sql) {
            tracing::error!(error = %e, level = self.level, "rollback failed");
        }
        self.finish();
    }
}

/// Fixed-width UTC text so lexical order equals chronological order.
pub(crate) fn ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Read a timestamp column.
pub(crate) fn get_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(idx, &raw)
}

/// Read a nullable timestamp column.
pub(crate) fn get_opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| parse_ts(idx, &r)).transpose()
}

/// Read a status/enum label column.
pub(crate) fn get_label<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = UnknownLabel>,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

macro_rules! sql_id {
    ($($name:ty),* $(,)?) => {
        $(
            impl ToSql for $name {
                fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                    Ok(ToSqlOutput::from(self.0))
                }
            }

            impl FromSql for $name {
                fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                    match value {
                        ValueRef::Integer(i) => Ok(Self(i)),
                        _ => Err(FromSqlError::InvalidType),
                    }
                }
            }
        )*
    };
}

sql_id!(
    PathwayId,
    ProviderId,
    PatientId,
    CaseId,
    VisitId,
    CareProvidingStateId,
    AssignmentId,
    QueueItemId,
);

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory();
        assert!(db.is_ok());
    }

    #[test]
    fn test_schema_initialized() {
        let db = Database::open_in_memory().unwrap();

        let tables: Vec<String> = db
            .conn()
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        for table in [
            "patient_case",
            "visit",
            "care_team_assignment",
            "unclaimed_queue",
            "provider_queue_item",
            "provider_notified",
            "state_pathway_notified",
            "state_pathway_eligibility",
            "communication_snooze",
            "advisory_lock",
        ] {
            assert!(tables.contains(&table.to_string()), "missing {}", table);
        }
    }

    #[test]
    fn test_timestamps_sort_lexically() {
        let a = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let b = a + chrono::Duration::milliseconds(1);
        let c = a + chrono::Duration::hours(3);
        assert!(ts(&a) < ts(&b));
        assert!(ts(&b) < ts(&c));
        assert_eq!(ts(&a).len(), ts(&b).len());
        assert_eq!(ts(&a), "2024-01-01T09:00:00.000000Z");
    }

    #[test]
    fn test_dropped_guard_rolls_back() {
        let db = Database::open_in_memory().unwrap();
        {
            let _tx = db.begin().unwrap();
            db.conn()
                .execute(
                    "INSERT INTO patient (state) VALUES ('CA')",
                    [],
                )
                .unwrap();
        }
        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM patient", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
        assert!(db.conn().is_autocommit());
    }

    #[test]
    fn test_nested_guard_rolls_back_only_inner() {
        let db = Database::open_in_memory().unwrap();
        let outer = db.begin().unwrap();
        db.conn()
            .execute("INSERT INTO patient (state) VALUES ('CA')", [])
            .unwrap();
        {
            let _inner = db.begin().unwrap();
            db.conn()
                .execute("INSERT INTO patient (state) VALUES ('NY')", [])
                .unwrap();
        }
        outer.commit().unwrap();

        let states: Vec<String> = db
            .conn()
            .prepare("SELECT state FROM patient")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();
        assert_eq!(states, vec!["CA".to_string()]);
    }
}
