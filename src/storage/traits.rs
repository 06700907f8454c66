//! Record store trait definitions.

use crate::domain::RunRecord;
use crate::error::{EvalLoopError, Result};

/// Durable, append-only collection of run records.
///
/// Implementations must tolerate concurrent writers: two executors
/// appending at once may not corrupt or lose either record.
pub trait RecordStore: Send + Sync {
    /// Persist a new record. A duplicate attempt id is a storage error.
    fn append(&self, record: &RunRecord) -> Result<()>;

    /// Write the terminal version of a running attempt.
    ///
    /// Fails with `AttemptNotFound` when the attempt is unknown and
    /// `AttemptFinalized` when it already reached a terminal status.
    fn finish(&self, record: &RunRecord) -> Result<()>;

    /// Visit every record visible at call time, latest version per attempt.
    ///
    /// Order is unspecified. Implementations stream rather than buffering
    /// the whole store.
    fn scan(&self, visit: &mut dyn FnMut(RunRecord) -> Result<()>) -> Result<()>;

    /// Collect every record.
    fn list_all(&self) -> Result<Vec<RunRecord>> {
        let mut records = Vec::new();
        self.scan(&mut |record| {
            records.push(record);
            Ok(())
        })?;
        Ok(records)
    }
}

/// Look up the current version of one attempt.
pub fn find_attempt<S: RecordStore + ?Sized>(store: &S, attempt_id: &str) -> Result<Option<RunRecord>> {
    let mut found = None;
    store.scan(&mut |record| {
        if record.attempt_id == attempt_id {
            found = Some(record);
        }
        Ok(())
    })?;
    Ok(found)
}

/// Reject finalize requests that would leave the attempt running.
pub(crate) fn ensure_terminal(record: &RunRecord) -> Result<()> {
    if !record.status.is_terminal() {
        return Err(EvalLoopError::InvalidState(format!(
            "cannot finish attempt {} with status running",
            record.attempt_id
        )));
    }
    Ok(())
}
