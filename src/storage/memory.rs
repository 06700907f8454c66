//! In-memory record store.

use std::sync::Mutex;

use super::traits::{RecordStore, ensure_terminal};
use crate::domain::RunRecord;
use crate::error::{EvalLoopError, Result};

/// Record store backed by a `Vec`, for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<Vec<RunRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with records.
    pub fn with_records(records: impl IntoIterator<Item = RunRecord>) -> Self {
        Self {
            records: Mutex::new(records.into_iter().collect()),
        }
    }

    /// Number of stored attempts.
    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordStore for MemoryRecordStore {
    fn append(&self, record: &RunRecord) -> Result<()> {
        let mut records = self.records.lock().map_err(|e| EvalLoopError::Storage(e.to_string()))?;
        if records.iter().any(|r| r.attempt_id == record.attempt_id) {
            return Err(EvalLoopError::Storage(format!(
                "duplicate attempt id: {}",
                record.attempt_id
            )));
        }
        records.push(record.clone());
        Ok(())
    }

    fn finish(&self, record: &RunRecord) -> Result<()> {
        ensure_terminal(record)?;
        let mut records = self.records.lock().map_err(|e| EvalLoopError::Storage(e.to_string()))?;
        let existing = records
            .iter_mut()
            .find(|r| r.attempt_id == record.attempt_id)
            .ok_or_else(|| EvalLoopError::AttemptNotFound(record.attempt_id.clone()))?;

        if existing.status.is_terminal() {
            return Err(EvalLoopError::AttemptFinalized(record.attempt_id.clone()));
        }
        *existing = record.clone();
        Ok(())
    }

    fn scan(&self, visit: &mut dyn FnMut(RunRecord) -> Result<()>) -> Result<()> {
        // Snapshot first so the visitor may call back into the store.
        let snapshot = self
            .records
            .lock()
            .map_err(|e| EvalLoopError::Storage(e.to_string()))?
            .clone();
        for record in snapshot {
            visit(record)?;
        }
        Ok(())
    }
}
