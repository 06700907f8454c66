//! Scripted runner for tests and dry runs.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use super::TaskRunner;
use crate::domain::{Attempt, RunStatus, TaskOutcome};
use crate::error::{EvalLoopError, Result};

/// Runner that replays a queue of outcomes per logical task.
///
/// Once a task's queue is empty every further attempt succeeds. Every call
/// is recorded so tests can inspect resume hints.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    scripts: Mutex<HashMap<String, VecDeque<TaskOutcome>>>,
    calls: Mutex<Vec<Attempt>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an outcome for the next attempt of a task.
    pub fn push(&self, logical_task_id: &str, outcome: TaskOutcome) -> &Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts
                .entry(logical_task_id.to_string())
                .or_default()
                .push_back(outcome);
        }
        self
    }

    /// Queue `n` failures before the task starts succeeding.
    pub fn fail_times(&self, logical_task_id: &str, n: usize) -> &Self {
        for i in 0..n {
            self.push(logical_task_id, TaskOutcome::error(format!("scripted failure {}", i + 1)));
        }
        self
    }

    /// Every attempt run so far, in call order.
    pub fn calls(&self) -> Vec<Attempt> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self, logical_task_id: &str) -> usize {
        self.calls()
            .iter()
            .filter(|a| a.logical_task_id == logical_task_id)
            .count()
    }
}

#[async_trait]
impl TaskRunner for ScriptedRunner {
    async fn run(&self, attempt: &Attempt) -> Result<TaskOutcome> {
        self.calls
            .lock()
            .map_err(|e| EvalLoopError::InvalidState(e.to_string()))?
            .push(attempt.clone());

        let next = self
            .scripts
            .lock()
            .map_err(|e| EvalLoopError::InvalidState(e.to_string()))?
            .get_mut(&attempt.logical_task_id)
            .and_then(|queue| queue.pop_front());

        Ok(next.unwrap_or_else(|| TaskOutcome {
            status: RunStatus::Success,
            completed_units: Vec::new(),
            location: None,
            error: None,
        }))
    }
}
