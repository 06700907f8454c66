//! Retry executor - runs one attempt and records its outcome.
//!
//! Lifecycle of every attempt:
//! 1. append a `running` record (fresh attempt id, resume hint as units)
//! 2. call the task runner
//! 3. finish the record with the terminal status
//!
//! Task failures end up in the record; only store failures are returned.

use std::sync::Arc;

use crate::domain::{Attempt, RunRecord, RunStatus, TaskOutcome, merge_units};
use crate::error::{EvalLoopError, Result};
use crate::runner::TaskRunner;
use crate::storage::{RecordStore, find_attempt};

/// Executes attempts against a shared store.
pub struct RetryExecutor<S: RecordStore + ?Sized, R: TaskRunner + ?Sized> {
    store: Arc<S>,
    runner: Arc<R>,
}

impl<S: RecordStore + ?Sized, R: TaskRunner + ?Sized> Clone for RetryExecutor<S, R> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            runner: Arc::clone(&self.runner),
        }
    }
}

impl<S: RecordStore + ?Sized, R: TaskRunner + ?Sized> RetryExecutor<S, R> {
    pub fn new(store: Arc<S>, runner: Arc<R>) -> Self {
        Self { store, runner }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Re-run the task behind a failing record.
    ///
    /// The input record is left untouched; exactly one new record is added.
    pub async fn execute_retry(&self, record: &RunRecord) -> Result<RunRecord> {
        if !record.status.is_failure() {
            return Err(EvalLoopError::InvalidState(format!(
                "attempt {} of {} is {}, only error or cancelled attempts are retried",
                record.attempt_id, record.logical_task_id, record.status
            )));
        }
        self.execute(RunRecord::start_retry(record)).await
    }

    /// Run a first attempt of a task that has no record yet.
    pub async fn execute_fresh(&self, logical_task_id: &str) -> Result<RunRecord> {
        self.execute(RunRecord::start(logical_task_id)).await
    }

    async fn execute(&self, running: RunRecord) -> Result<RunRecord> {
        self.store.append(&running)?;
        tracing::info!(
            task = %running.logical_task_id,
            attempt = %running.attempt_id,
            retry_of = ?running.retry_of,
            resume_units = running.completed_units.len(),
            "Attempt started"
        );

        let attempt = Attempt {
            logical_task_id: running.logical_task_id.clone(),
            attempt_id: running.attempt_id.clone(),
            resume_hint: running.completed_units.clone(),
        };
        let outcome = match self.runner.run(&attempt).await {
            Ok(outcome) if outcome.status == RunStatus::Running => {
                TaskOutcome::error("runner returned without finishing the attempt")
                    .with_units(outcome.completed_units)
            }
            Ok(outcome) => outcome,
            Err(e) => TaskOutcome::error(e.to_string()),
        };

        let finished = RunRecord {
            status: outcome.status,
            completed_units: merge_units(&running.completed_units, &outcome.completed_units),
            location: outcome.location,
            error: outcome.error,
            ..running.clone()
        };

        match self.store.finish(&finished) {
            Ok(()) => {}
            Err(EvalLoopError::AttemptFinalized(_)) => {
                tracing::warn!(
                    task = %running.logical_task_id,
                    attempt = %running.attempt_id,
                    "Attempt was cancelled while running; keeping cancellation"
                );
                return find_attempt(&*self.store, &running.attempt_id)?
                    .ok_or_else(|| EvalLoopError::AttemptNotFound(running.attempt_id.clone()));
            }
            Err(e) => return Err(e),
        }

        match finished.status {
            RunStatus::Success => tracing::info!(
                task = %finished.logical_task_id,
                attempt = %finished.attempt_id,
                units = finished.completed_units.len(),
                "Attempt succeeded"
            ),
            _ => tracing::warn!(
                task = %finished.logical_task_id,
                attempt = %finished.attempt_id,
                status = %finished.status,
                error = finished.error.as_deref().unwrap_or(""),
                "Attempt failed"
            ),
        }
        Ok(finished)
    }
}
