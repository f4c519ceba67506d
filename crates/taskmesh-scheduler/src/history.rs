//! Run history — where finalized execution states land.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, params};
use std::path::Path;
use std::sync::Mutex;

use crate::host::{ExecutionRecord, RunStatus};
use taskmesh_core::error::{Result, TaskMeshError};
use taskmesh_core::identity::JobKey;

pub trait RunHistory: Send + Sync {
    fn record(&self, record: &ExecutionRecord) -> Result<()>;

    /// Most recent runs of `job`, newest first.
    fn recent(&self, job: &JobKey, limit: usize) -> Result<Vec<ExecutionRecord>>;
}

/// SQLite-backed run history.
pub struct SqliteRunHistory {
    conn: Mutex<Connection>,
}

impl SqliteRunHistory {
    /// Open or create the history database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| TaskMeshError::Other(format!("History DB open: {e}")))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS run_history (
                run_id TEXT PRIMARY KEY,
                job_group TEXT NOT NULL,
                job_name TEXT NOT NULL,
                status TEXT NOT NULL,            -- 'success', 'fail', 'cancelled'
                progress INTEGER NOT NULL,
                effected_rows INTEGER,
                log TEXT NOT NULL DEFAULT '',
                exceptions TEXT NOT NULL DEFAULT '[]',  -- JSON array of {message, detail}
                started_at TEXT NOT NULL,
                finished_at TEXT NOT NULL,
                duration_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_run_history_job
                ON run_history (job_group, job_name, started_at);
         ",
            )
            .map_err(|e| TaskMeshError::Other(format!("History migration: {e}")))
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| TaskMeshError::Other(format!("Lock: {e}")))
    }
}

fn conversion_error(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn parse_time(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

impl RunHistory for SqliteRunHistory {
    fn record(&self, record: &ExecutionRecord) -> Result<()> {
        let exceptions = serde_json::to_string(&record.exceptions)?;
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO run_history
                 (run_id, job_group, job_name, status, progress, effected_rows, log, exceptions,
                  started_at, finished_at, duration_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    record.run_id.to_string(),
                    record.job.group,
                    record.job.name,
                    record.status.as_str(),
                    record.progress,
                    record.effected_rows,
                    record.log,
                    exceptions,
                    record.started_at.to_rfc3339(),
                    record.finished_at.to_rfc3339(),
                    record.duration_ms,
                ],
            )
            .map_err(|e| TaskMeshError::Other(format!("Save run: {e}")))?;
        tracing::debug!("💾 Saved run {} of {}", record.run_id, record.job);
        Ok(())
    }

    fn recent(&self, job: &JobKey, limit: usize) -> Result<Vec<ExecutionRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT run_id, status, progress, effected_rows, log, exceptions,
                        started_at, finished_at, duration_ms
                 FROM run_history WHERE job_group = ?1 AND job_name = ?2
                 ORDER BY started_at DESC LIMIT ?3",
            )
            .map_err(|e| TaskMeshError::Other(format!("Load runs: {e}")))?;

        let rows = stmt
            .query_map(params![job.group, job.name, limit as i64], |row| {
                let run_id: String = row.get(0)?;
                let status: String = row.get(1)?;
                let exceptions: String = row.get(5)?;
                let started_at: String = row.get(6)?;
                let finished_at: String = row.get(7)?;
                Ok(ExecutionRecord {
                    run_id: run_id.parse().map_err(|e| conversion_error(0, e))?,
                    job: job.clone(),
                    status: RunStatus::parse(&status),
                    progress: row.get(2)?,
                    effected_rows: row.get(3)?,
                    log: row.get(4)?,
                    exceptions: serde_json::from_str(&exceptions)
                        .map_err(|e| conversion_error(5, e))?,
                    started_at: parse_time(6, &started_at)?,
                    finished_at: parse_time(7, &finished_at)?,
                    duration_ms: row.get(8)?,
                })
            })
            .map_err(|e| TaskMeshError::Other(format!("Load runs: {e}")))?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| TaskMeshError::Other(format!("Load runs: {e}")))
    }
}
