//! SQLite persistence for accepted resources.
//!
//! One row per job id (the resource name). Re-applying a resource with the
//! same name replaces its schedule and spec in place.

use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, params};
use stockdb_protocol::resource::{DataCollection, ScheduleType};
use tracing::{debug, info};

use crate::errors::StoreError;

pub type Result<T> = std::result::Result<T, StoreError>;

const DB_DIR_MODE: u32 = 0o750;
const DB_FILE_MODE: u32 = 0o600;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Timestamp layout used by SQLite's `CURRENT_TIMESTAMP`
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL UNIQUE,
    job_type TEXT NOT NULL CHECK(job_type IN ('RECURRING', 'INTERVAL')),
    created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
    schedule_type TEXT NOT NULL CHECK(schedule_type IN ('RECURRING', 'INTERVAL')),
    schedule_start_at DATETIME NOT NULL,
    schedule_end_at DATETIME,
    schedule_frequency TEXT,
    spec_json TEXT NOT NULL CHECK(json_valid(spec_json)),
    attempts INTEGER NOT NULL DEFAULT 0 CHECK(attempts >= 0),
    max_retries INTEGER NOT NULL DEFAULT 3 CHECK(max_retries >= 0)
);

CREATE INDEX IF NOT EXISTS idx_jobs_created_desc ON jobs (created_at DESC);
CREATE INDEX IF NOT EXISTS idx_jobs_created_asc ON jobs (created_at ASC);
"#;

const SELECT_COLUMNS: &str = "id, job_id, job_type, created_at, updated_at, schedule_type, \
     schedule_start_at, schedule_end_at, schedule_frequency, spec_json, attempts, max_retries";

/// Column value for a known schedule type
fn schedule_column(schedule_type: ScheduleType) -> Result<&'static str> {
    match schedule_type {
        ScheduleType::Recurring => Ok("RECURRING"),
        ScheduleType::Interval => Ok("INTERVAL"),
        ScheduleType::Unknown => Err(StoreError::ScheduleType(schedule_type.to_string())),
    }
}

/// Accepts RFC 3339 timestamps and plain `YYYY-MM-DD` dates (midnight UTC)
pub fn parse_schedule_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
        .or_else(|| parse_schedule_date(s))
}

/// A job row ready to be written
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub job_id: String,
    pub schedule_type: ScheduleType,
    pub schedule_start_at: DateTime<Utc>,
    pub schedule_end_at: Option<DateTime<Utc>>,
    pub schedule_frequency: Option<String>,
    pub spec: serde_json::Value,
    pub max_retries: u32,
}

impl NewJob {
    /// Build the row for a data collection. A missing start date means "now".
    pub fn from_collection(collection: &DataCollection) -> Result<Self> {
        let schedule = &collection.spec.schedule;
        schedule_column(schedule.schedule_type)?;

        Ok(Self {
            job_id: collection.name().to_string(),
            schedule_type: schedule.schedule_type,
            schedule_start_at: schedule
                .start_date
                .as_deref()
                .and_then(parse_schedule_date)
                .unwrap_or_else(Utc::now),
            schedule_end_at: schedule.end_date.as_deref().and_then(parse_schedule_date),
            schedule_frequency: schedule.frequency.clone(),
            spec: serde_json::to_value(collection)?,
            max_retries: collection.spec.options.retries,
        })
    }
}

/// A stored job row
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub id: i64,
    pub job_id: String,
    pub job_type: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub schedule_type: String,
    pub schedule_start_at: Option<DateTime<Utc>>,
    pub schedule_end_at: Option<DateTime<Utc>>,
    pub schedule_frequency: Option<String>,
    pub spec: serde_json::Value,
    pub attempts: u32,
    pub max_retries: u32,
}

impl JobRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let timestamp = |idx: usize| -> rusqlite::Result<Option<DateTime<Utc>>> {
            Ok(row.get::<_, Option<String>>(idx)?.as_deref().and_then(parse_timestamp))
        };
        let spec_json: String = row.get(9)?;
        let spec = serde_json::from_str(&spec_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(9, rusqlite::types::Type::Text, Box::new(e))
        })?;

        Ok(Self {
            id: row.get(0)?,
            job_id: row.get(1)?,
            job_type: row.get(2)?,
            created_at: timestamp(3)?,
            updated_at: timestamp(4)?,
            schedule_type: row.get(5)?,
            schedule_start_at: timestamp(6)?,
            schedule_end_at: timestamp(7)?,
            schedule_frequency: row.get(8)?,
            spec,
            attempts: row.get(10)?,
            max_retries: row.get(11)?,
        })
    }
}

/// What `upsert` did. An update keeps the row it replaced so it can be reverted.
#[derive(Debug, Clone, PartialEq)]
pub enum Upserted {
    Created,
    Updated(Box<JobRecord>),
}

impl Upserted {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated(_) => "configured",
        }
    }
}

#[derive(Debug)]
pub struct JobStore {
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
}

impl JobStore {
    /// Open (creating if needed) the database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::DirBuilder::new()
                .recursive(true)
                .mode(DB_DIR_MODE)
                .create(dir)
                .map_err(|e| StoreError::Directory {
                    path: dir.to_path_buf(),
                    source: e,
                })?;
        }

        let existed = path.exists();
        let conn = Connection::open(&path)?;
        if !existed {
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(DB_FILE_MODE))
                .map_err(|e| StoreError::Directory {
                    path: path.clone(),
                    source: e,
                })?;
        }

        let store = Self::init(conn, Some(path))?;
        info!("Job database open at {}", store.describe());
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(mut conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA foreign_keys=ON;
            "#,
        )?;

        let tx = conn.transaction()?;
        tx.execute_batch(SCHEMA)?;
        tx.commit()?;

        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn describe(&self) -> String {
        match &self.path {
            Some(path) => path.display().to_string(),
            None => ":memory:".to_string(),
        }
    }

    /// Insert the job, or replace schedule and spec of an existing one
    pub fn upsert(&self, job: &NewJob) -> Result<Upserted> {
        let job_type = schedule_column(job.schedule_type)?;
        let spec_json = serde_json::to_string(&job.spec)?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let select = format!("SELECT {} FROM jobs WHERE job_id = ?1", SELECT_COLUMNS);
        let previous = tx
            .query_row(&select, params![job.job_id], JobRecord::from_row)
            .optional()?;

        tx.execute(
            r#"
            INSERT INTO jobs (
                job_id, job_type, schedule_type, schedule_start_at,
                schedule_end_at, schedule_frequency, spec_json, max_retries
            )
            VALUES (?1, ?2, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(job_id) DO UPDATE SET
                job_type = excluded.job_type,
                schedule_type = excluded.schedule_type,
                schedule_start_at = excluded.schedule_start_at,
                schedule_end_at = excluded.schedule_end_at,
                schedule_frequency = excluded.schedule_frequency,
                spec_json = excluded.spec_json,
                max_retries = excluded.max_retries,
                updated_at = CURRENT_TIMESTAMP
            "#,
            params![
                job.job_id,
                job_type,
                format_timestamp(&job.schedule_start_at),
                job.schedule_end_at.as_ref().map(format_timestamp),
                job.schedule_frequency,
                spec_json,
                job.max_retries,
            ],
        )?;
        tx.commit()?;

        let outcome = match previous {
            Some(record) => Upserted::Updated(Box::new(record)),
            None => Upserted::Created,
        };
        debug!(job_id = %job.job_id, outcome = outcome.as_str(), "Job stored");
        Ok(outcome)
    }

    /// Undo an `upsert` of `job_id`: delete a created row, or put back the
    /// row an update replaced.
    pub fn revert(&self, job_id: &str, outcome: &Upserted) -> Result<()> {
        let conn = self.conn.lock();
        match outcome {
            Upserted::Created => {
                conn.execute("DELETE FROM jobs WHERE job_id = ?1", params![job_id])?;
            }
            Upserted::Updated(previous) => {
                conn.execute(
                    r#"
                    UPDATE jobs SET
                        job_type = ?2,
                        schedule_type = ?3,
                        schedule_start_at = ?4,
                        schedule_end_at = ?5,
                        schedule_frequency = ?6,
                        spec_json = ?7,
                        max_retries = ?8,
                        updated_at = COALESCE(?9, updated_at)
                    WHERE job_id = ?1
                    "#,
                    params![
                        job_id,
                        previous.job_type,
                        previous.schedule_type,
                        previous.schedule_start_at.as_ref().map(format_timestamp),
                        previous.schedule_end_at.as_ref().map(format_timestamp),
                        previous.schedule_frequency,
                        serde_json::to_string(&previous.spec)?,
                        previous.max_retries,
                        previous.updated_at.as_ref().map(format_timestamp),
                    ],
                )?;
            }
        }
        debug!(job_id, outcome = outcome.as_str(), "Job store change reverted");
        Ok(())
    }

    pub fn get(&self, job_id: &str) -> Result<Option<JobRecord>> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {} FROM jobs WHERE job_id = ?1", SELECT_COLUMNS);
        Ok(conn
            .query_row(&sql, params![job_id], JobRecord::from_row)
            .optional()?)
    }

    pub fn count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get(0))?;
        Ok(n.max(0) as u64)
    }

    /// Jobs created today (UTC), newest first
    pub fn created_today(&self) -> Result<Vec<JobRecord>> {
        self.query_where("date(created_at) = date('now') ORDER BY created_at DESC, id DESC")
    }

    /// Jobs created before today (UTC), oldest first
    pub fn historical(&self) -> Result<Vec<JobRecord>> {
        self.query_where("date(created_at) < date('now') ORDER BY created_at ASC, id ASC")
    }

    fn query_where(&self, clause: &str) -> Result<Vec<JobRecord>> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {} FROM jobs WHERE {}", SELECT_COLUMNS, clause);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], JobRecord::from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}
