//! SQLite-backed wait job store.
//!
//! One row per job, keyed by id. Rows are written at registration and
//! rewritten once at the terminal transition; the table exists for
//! crash-recovery listing, not as the engine's working state.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

use vigil_claw_engine::{EngineError, WaitRecord, WaitStatus, WaitStore};

const ORPHAN_DETAIL: &str = "daemon restarted while watching";

pub struct SqliteWaitStore {
    conn: Mutex<Connection>,
}

impl SqliteWaitStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, EngineError> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| EngineError::Store(e.to_string()))?;
            }
        }
        let conn = Connection::open(db_path).map_err(db_err)?;
        conn.pragma_update(None, "journal_mode", "WAL").map_err(db_err)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS wait_jobs (
                id TEXT PRIMARY KEY,
                task_id TEXT,
                target TEXT NOT NULL,
                criteria TEXT NOT NULL,
                timeout_seconds INTEGER NOT NULL,
                poll_interval REAL NOT NULL,
                status TEXT NOT NULL DEFAULT 'watching',
                detail TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                resolved_at TEXT
            )",
            [],
        )
        .map_err(db_err)?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_wait_jobs_status ON wait_jobs(status)",
            [],
        )
        .map_err(db_err)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Most recent jobs first, any status.
    pub fn list_recent(&self, limit: usize) -> Result<Vec<WaitRecord>, EngineError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, task_id, target, criteria, timeout_seconds, poll_interval,
                        status, detail, created_at, resolved_at
                 FROM wait_jobs ORDER BY created_at DESC LIMIT ?1",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![limit as i64], row_to_record)
            .map_err(db_err)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(db_err)?);
        }
        Ok(records)
    }
}

#[async_trait]
impl WaitStore for SqliteWaitStore {
    async fn record_created(&self, record: &WaitRecord) -> Result<(), EngineError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO wait_jobs
                (id, task_id, target, criteria, timeout_seconds, poll_interval,
                 status, detail, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.id,
                record.task_id,
                record.target.to_string(),
                record.criteria,
                record.timeout_s as i64,
                record.poll_interval_s,
                record.status.as_str(),
                record.detail,
                record.created_at.to_rfc3339(),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn record_terminal(
        &self,
        id: &str,
        status: WaitStatus,
        detail: &str,
        resolved_at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                "UPDATE wait_jobs SET status = ?1, detail = ?2, resolved_at = ?3 WHERE id = ?4",
                params![status.as_str(), detail, resolved_at.to_rfc3339(), id],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(EngineError::Store(format!("no record for job {id}")));
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<WaitRecord>, EngineError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, task_id, target, criteria, timeout_seconds, poll_interval,
                    status, detail, created_at, resolved_at
             FROM wait_jobs WHERE id = ?1",
            params![id],
            row_to_record,
        )
        .optional()
        .map_err(db_err)
    }

    async fn recover_interrupted(&self) -> Result<Vec<String>, EngineError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT id FROM wait_jobs WHERE status = 'watching'")
            .map_err(db_err)?;
        let ids: Result<Vec<String>, _> = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(db_err)?
            .collect();
        let ids = ids.map_err(db_err)?;

        if !ids.is_empty() {
            conn.execute(
                "UPDATE wait_jobs SET status = 'error', detail = ?1, resolved_at = ?2
                 WHERE status = 'watching'",
                params![ORPHAN_DETAIL, Utc::now().to_rfc3339()],
            )
            .map_err(db_err)?;
        }
        Ok(ids)
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<WaitRecord> {
    let target_raw: String = row.get(2)?;
    let status_raw: String = row.get(6)?;
    let created_raw: String = row.get(8)?;
    let resolved_raw: Option<String> = row.get(9)?;

    Ok(WaitRecord {
        id: row.get(0)?,
        task_id: row.get(1)?,
        target: target_raw.parse().unwrap_or(vigil_claw_engine::WaitTarget::Screen),
        criteria: row.get(3)?,
        timeout_s: row.get::<_, i64>(4)? as u64,
        poll_interval_s: row.get(5)?,
        status: status_raw.parse().unwrap_or(WaitStatus::Error),
        detail: row.get(7)?,
        created_at: parse_ts(&created_raw),
        resolved_at: resolved_raw.as_deref().map(parse_ts),
    })
}

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn db_err(err: rusqlite::Error) -> EngineError {
    EngineError::Store(err.to_string())
}
