use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use ingest_core::clock::{format_ts, parse_ts};
use rusqlite::{Connection, Row};
use tracing::instrument;

use crate::db::init_db;
use crate::error::{Result, StoreError};
use crate::types::HistoryRecord;

const SELECT_HISTORY: &str = "SELECT id, run_id, job_name, run_trigger, status,
            run_started_at, run_finished_at, duration_ms,
            records_processed, versions_created, error_detail
     FROM ingestion_history";

/// Append-only log of ingestion attempts.
pub struct HistoryStore {
    db: Mutex<Connection>,
}

impl HistoryStore {
    /// Wrap an open connection, creating the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Insert one attempt and return its row id.
    #[instrument(skip(self, record), fields(job = %record.job_name, run_id = %record.run_id))]
    pub fn append(&self, record: &HistoryRecord) -> Result<i64> {
        let db = self.conn()?;
        db.execute(
            "INSERT INTO ingestion_history
             (run_id, job_name, run_trigger, status, run_started_at, run_finished_at,
              duration_ms, records_processed, versions_created, error_detail)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                record.run_id,
                record.job_name,
                record.trigger.to_string(),
                record.status.to_string(),
                format_ts(record.run_started_at),
                format_ts(record.run_finished_at),
                record.duration_ms,
                record.records_processed as i64,
                record.versions_created as i64,
                record.error_detail,
            ],
        )?;
        Ok(db.last_insert_rowid())
    }

    /// Most recent attempts across all jobs, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<HistoryRecord>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(&format!(
            "{SELECT_HISTORY} ORDER BY run_started_at DESC, id DESC LIMIT ?1"
        ))?;
        let rows = stmt
            .query_map([limit as i64], RawHistory::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(RawHistory::into_record).collect()
    }

    /// Attempts of a single job in execution order.
    pub fn for_job(&self, job_name: &str) -> Result<Vec<HistoryRecord>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(&format!(
            "{SELECT_HISTORY} WHERE job_name = ?1 ORDER BY run_started_at, id"
        ))?;
        let rows = stmt
            .query_map([job_name], RawHistory::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(RawHistory::into_record).collect()
    }

    /// Latest `run_started_at` per job, used to restore run state after a restart.
    pub fn last_runs(&self) -> Result<HashMap<String, DateTime<Utc>>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT job_name, MAX(run_started_at) FROM ingestion_history GROUP BY job_name",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(job, at)| -> Result<(String, DateTime<Utc>)> { Ok((job, parse_ts(&at)?)) })
            .collect()
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| StoreError::Poisoned)
    }
}

struct RawHistory {
    id: i64,
    run_id: String,
    job_name: String,
    trigger: String,
    status: String,
    run_started_at: String,
    run_finished_at: String,
    duration_ms: i64,
    records_processed: i64,
    versions_created: i64,
    error_detail: Option<String>,
}

impl RawHistory {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            run_id: row.get(1)?,
            job_name: row.get(2)?,
            trigger: row.get(3)?,
            status: row.get(4)?,
            run_started_at: row.get(5)?,
            run_finished_at: row.get(6)?,
            duration_ms: row.get(7)?,
            records_processed: row.get(8)?,
            versions_created: row.get(9)?,
            error_detail: row.get(10)?,
        })
    }

    fn into_record(self) -> Result<HistoryRecord> {
        Ok(HistoryRecord {
            id: Some(self.id),
            run_id: self.run_id,
            job_name: self.job_name,
            trigger: self.trigger.parse().map_err(StoreError::Serialization)?,
            status: self.status.parse().map_err(StoreError::Serialization)?,
            run_started_at: parse_ts(&self.run_started_at)?,
            run_finished_at: parse_ts(&self.run_finished_at)?,
            duration_ms: self.duration_ms,
            records_processed: self.records_processed.max(0) as u64,
            versions_created: self.versions_created.max(0) as u64,
            error_detail: self.error_detail,
        })
    }
}
