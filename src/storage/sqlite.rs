//! SQLite-backed record store.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, params};

use super::traits::{RecordStore, ensure_terminal};
use crate::domain::{RunRecord, RunStatus};
use crate::error::{EvalLoopError, Result};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS run_records (
    attempt_id      TEXT PRIMARY KEY,
    logical_task_id TEXT NOT NULL,
    status          TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    payload         TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_run_records_task ON run_records (logical_task_id);
";

/// Record store keeping one row per attempt.
///
/// rusqlite's Connection isn't Sync, so access goes through a Mutex.
pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteRecordStore").finish_non_exhaustive()
    }
}

impl SqliteRecordStore {
    /// Open or create a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| EvalLoopError::Storage(e.to_string()))?;
        Self::bootstrap(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| EvalLoopError::Storage(e.to_string()))?;
        Self::bootstrap(conn)
    }

    fn bootstrap(conn: Connection) -> Result<Self> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| EvalLoopError::Storage(e.to_string()))
    }
}

impl RecordStore for SqliteRecordStore {
    fn append(&self, record: &RunRecord) -> Result<()> {
        let payload = serde_json::to_string(record)?;
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO run_records (attempt_id, logical_task_id, status, created_at, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.attempt_id,
                record.logical_task_id,
                record.status.as_str(),
                record.created_at.to_rfc3339(),
                payload
            ],
        )?;
        if inserted == 0 {
            return Err(EvalLoopError::Storage(format!(
                "duplicate attempt id: {}",
                record.attempt_id
            )));
        }
        Ok(())
    }

    fn finish(&self, record: &RunRecord) -> Result<()> {
        ensure_terminal(record)?;
        let payload = serde_json::to_string(record)?;
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE run_records SET status = ?2, payload = ?3
             WHERE attempt_id = ?1 AND status = ?4",
            params![
                record.attempt_id,
                record.status.as_str(),
                payload,
                RunStatus::Running.as_str()
            ],
        )?;
        if updated == 1 {
            return Ok(());
        }

        let exists: Option<String> = conn
            .query_row(
                "SELECT status FROM run_records WHERE attempt_id = ?1",
                params![record.attempt_id],
                |row| row.get(0),
            )
            .optional()?;
        match exists {
            Some(_) => Err(EvalLoopError::AttemptFinalized(record.attempt_id.clone())),
            None => Err(EvalLoopError::AttemptNotFound(record.attempt_id.clone())),
        }
    }

    fn scan(&self, visit: &mut dyn FnMut(RunRecord) -> Result<()>) -> Result<()> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT payload FROM run_records ORDER BY logical_task_id, created_at")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let payload: String = row.get(0)?;
            let record: RunRecord = serde_json::from_str(&payload)
                .map_err(|e| EvalLoopError::Storage(format!("corrupt payload: {}", e)))?;
            visit(record)?;
        }
        Ok(())
    }
}
