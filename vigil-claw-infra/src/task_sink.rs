//! SQLite-backed task sink.
//!
//! Waits report into the external task memory twice: a `wait`-typed thread
//! message, and a metadata rewrite on the task row (`active_wait_ids`,
//! `last_wait_state`, `last_wait_event_at`). Tasks themselves are owned by
//! the task subsystem; this sink only threads into them.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

use vigil_claw_engine::{EngineError, TaskSink, TaskWaitUpdate, WaitStatus};

pub struct SqliteTaskSink {
    conn: Mutex<Connection>,
}

impl SqliteTaskSink {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, EngineError> {
        let conn = Connection::open(db_path).map_err(db_err)?;
        conn.pragma_update(None, "journal_mode", "WAL").map_err(db_err)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'active',
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )
        .map_err(db_err)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS task_messages (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL REFERENCES tasks(id),
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                msg_type TEXT NOT NULL DEFAULT 'text',
                created_at TEXT NOT NULL
            )",
            [],
        )
        .map_err(db_err)?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_task_messages_task_id
             ON task_messages(task_id, created_at)",
            [],
        )
        .map_err(db_err)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn read_metadata(conn: &Connection, task_id: &str) -> Result<Value, EngineError> {
        let raw: Option<String> = conn
            .query_row(
                "SELECT metadata FROM tasks WHERE id = ?1",
                params![task_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        let raw = raw.ok_or_else(|| EngineError::TaskSink(format!("task {task_id} not found")))?;
        let parsed: Value = serde_json::from_str(&raw).unwrap_or_else(|_| json!({}));
        // Anything that is not an object is unusable metadata; start over.
        if parsed.is_object() {
            Ok(parsed)
        } else {
            Ok(json!({}))
        }
    }

    fn write_metadata(
        conn: &Connection,
        task_id: &str,
        metadata: &Value,
    ) -> Result<(), EngineError> {
        conn.execute(
            "UPDATE tasks SET metadata = ?1, updated_at = ?2 WHERE id = ?3",
            params![metadata.to_string(), Utc::now().to_rfc3339(), task_id],
        )
        .map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl TaskSink for SqliteTaskSink {
    async fn post_wait_message(
        &self,
        task_id: &str,
        _state: WaitStatus,
        content: &str,
    ) -> Result<(), EngineError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO task_messages (id, task_id, role, content, msg_type, created_at)
             VALUES (?1, ?2, 'system', ?3, 'wait', ?4)",
            params![
                &Uuid::new_v4().simple().to_string()[..8],
                task_id,
                content,
                Utc::now().to_rfc3339()
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn update_wait_state(
        &self,
        task_id: &str,
        update: &TaskWaitUpdate,
    ) -> Result<(), EngineError> {
        let conn = self.conn.lock();
        let mut metadata = Self::read_metadata(&conn, task_id)?;

        let remaining: Vec<Value> = metadata
            .get("active_wait_ids")
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter(|v| v.as_str() != Some(update.remove_id.as_str()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        metadata["active_wait_ids"] = Value::Array(remaining);
        metadata["last_wait_state"] = json!(update.last_state.as_str());
        metadata["last_wait_event_at"] = json!(update.last_event_at);

        Self::write_metadata(&conn, task_id, &metadata)
    }

    async fn link_wait(&self, task_id: &str, wait_id: &str) -> Result<(), EngineError> {
        let conn = self.conn.lock();
        let mut metadata = Self::read_metadata(&conn, task_id)?;

        let mut ids: Vec<Value> = metadata
            .get("active_wait_ids")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if !ids.iter().any(|v| v.as_str() == Some(wait_id)) {
            ids.push(json!(wait_id));
        }

        metadata["active_wait_ids"] = Value::Array(ids);
        metadata["last_wait_state"] = json!("watching");
        metadata["last_wait_event_at"] = json!(Utc::now().timestamp());

        Self::write_metadata(&conn, task_id, &metadata)
    }
}

fn db_err(err: rusqlite::Error) -> EngineError {
    EngineError::TaskSink(err.to_string())
}
