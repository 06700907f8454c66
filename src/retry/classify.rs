//! Outcome classification for one logical task.
//!
//! All attempts of a logical task fold into a `GroupState`, which yields a
//! single `Decision`:
//! 1. any success → Done
//! 2. otherwise the latest error/cancelled attempt → Retry, unless a running
//!    attempt is newer than it (the retry already in flight) → Pending
//! 3. only running attempts → Pending, never Retry

use crate::domain::{RunRecord, RunStatus};
use crate::error::{EvalLoopError, Result};

/// Retry decision for one logical task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// A successful attempt exists; no further retries
    Done,
    /// Re-execute, resuming from this latest failing attempt
    Retry(RunRecord),
    /// An attempt is still in flight; do not start another
    Pending,
}

impl Decision {
    pub fn is_retry(&self) -> bool {
        matches!(self, Decision::Retry(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Decision::Done => "done",
            Decision::Retry(_) => "retry",
            Decision::Pending => "pending",
        }
    }
}

/// Incremental summary of the attempts seen for one logical task.
#[derive(Debug, Clone, Default)]
pub struct GroupState {
    logical_task_id: Option<String>,
    attempts: usize,
    latest_success: Option<RunRecord>,
    latest_failure: Option<RunRecord>,
    latest_running: Option<RunRecord>,
}

impl GroupState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one attempt into the summary.
    pub fn observe(&mut self, record: RunRecord) -> Result<()> {
        match &self.logical_task_id {
            Some(id) if *id != record.logical_task_id => {
                return Err(EvalLoopError::InvalidGroup(format!(
                    "attempt {} belongs to {}, not {}",
                    record.attempt_id, record.logical_task_id, id
                )));
            }
            Some(_) => {}
            None => self.logical_task_id = Some(record.logical_task_id.clone()),
        }
        self.attempts += 1;

        let slot = match record.status {
            RunStatus::Success => &mut self.latest_success,
            RunStatus::Error | RunStatus::Cancelled => &mut self.latest_failure,
            RunStatus::Running => &mut self.latest_running,
        };
        if slot.as_ref().is_none_or(|current| record.is_newer_than(current)) {
            *slot = Some(record);
        }
        Ok(())
    }

    pub fn logical_task_id(&self) -> Option<&str> {
        self.logical_task_id.as_deref()
    }

    pub fn attempts(&self) -> usize {
        self.attempts
    }

    pub fn latest_success(&self) -> Option<&RunRecord> {
        self.latest_success.as_ref()
    }

    /// Decision for the attempts seen so far; None before any attempt.
    pub fn decision(&self) -> Option<Decision> {
        if self.attempts == 0 {
            return None;
        }
        if self.latest_success.is_some() {
            return Some(Decision::Done);
        }
        match (&self.latest_failure, &self.latest_running) {
            (Some(failure), Some(running)) if running.is_newer_than(failure) => Some(Decision::Pending),
            (Some(failure), _) => Some(Decision::Retry(failure.clone())),
            (None, _) => Some(Decision::Pending),
        }
    }
}

/// Classify a non-empty group of attempts sharing one logical task id.
pub fn classify(records: &[RunRecord]) -> Result<Decision> {
    let mut state = GroupState::new();
    for record in records {
        state.observe(record.clone())?;
    }
    state
        .decision()
        .ok_or_else(|| EvalLoopError::InvalidGroup("no attempts to classify".to_string()))
}
