//! Convergence loop - select, retry, repeat until nothing needs a retry.
//!
//! ```text
//! Idle → Selecting ─┬─ empty selection ────────────→ Converged
//!                   ├─ budget exhausted ───────────→ Aborted
//!                   └─ retries selected → Executing → Selecting
//! ```
//!
//! The wall-clock budget is checked before each pass and before each attempt
//! starts, and takes precedence over the iteration budget when both are
//! spent. Attempts already in flight are allowed to finish, including after
//! a store failure, so no record is left `running` by the loop itself.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};

use crate::domain::RunRecord;
use crate::error::{EvalLoopError, Result};
use crate::retry::executor::RetryExecutor;
use crate::retry::select::snapshot;
use crate::runner::TaskRunner;
use crate::storage::RecordStore;

/// Budget and parallelism for a convergence run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    /// Maximum number of retry passes (≥ 1)
    pub max_iterations: u32,
    /// Wall-clock budget for the whole run
    pub max_wall_clock: Duration,
    /// Retries in flight at once within a pass (≥ 1)
    pub concurrency: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_wall_clock: Duration::from_secs(6 * 60 * 60),
            concurrency: 4,
        }
    }
}

impl LoopConfig {
    pub fn new(max_iterations: u32, max_wall_clock: Duration, concurrency: usize) -> Result<Self> {
        let config = Self {
            max_iterations,
            max_wall_clock,
            concurrency,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(EvalLoopError::InvalidConfig("max_iterations must be at least 1".into()));
        }
        if self.concurrency == 0 {
            return Err(EvalLoopError::InvalidConfig("concurrency must be at least 1".into()));
        }
        Ok(())
    }
}

/// State of a convergence run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Selecting,
    Executing,
    Converged,
    Aborted,
}

/// Which budget ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetExceeded {
    Iterations(u32),
    WallClock(Duration),
}

impl std::fmt::Display for BudgetExceeded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BudgetExceeded::Iterations(n) => write!(f, "max iterations ({})", n),
            BudgetExceeded::WallClock(d) => write!(f, "max wall clock ({}s)", d.as_secs()),
        }
    }
}

/// Terminal result of a convergence run.
///
/// Aborted is a result, not an error: callers must tell "no more work"
/// apart from "gave up".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopReport {
    Converged {
        passes: u32,
        /// Tasks with a successful attempt
        succeeded: Vec<String>,
        /// Tasks with an attempt still in flight
        pending: Vec<String>,
    },
    Aborted {
        passes: u32,
        /// Tasks still needing a retry when the budget ran out
        remaining: usize,
        budget: BudgetExceeded,
    },
}

impl LoopReport {
    pub fn is_converged(&self) -> bool {
        matches!(self, LoopReport::Converged { .. })
    }

    pub fn passes(&self) -> u32 {
        match self {
            LoopReport::Converged { passes, .. } | LoopReport::Aborted { passes, .. } => *passes,
        }
    }
}

/// Drives a store to convergence.
pub struct ConvergenceLoop<S: RecordStore + ?Sized, R: TaskRunner + ?Sized> {
    executor: RetryExecutor<S, R>,
    config: LoopConfig,
    state: LoopState,
    scope: Option<BTreeSet<String>>,
}

impl<S: RecordStore + ?Sized, R: TaskRunner + ?Sized> ConvergenceLoop<S, R> {
    pub fn new(store: Arc<S>, runner: Arc<R>, config: LoopConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            executor: RetryExecutor::new(store, runner),
            config,
            state: LoopState::Idle,
            scope: None,
        })
    }

    /// Restrict the loop to these logical tasks. Records of other tasks are
    /// left alone and do not count toward the report.
    pub fn with_scope(mut self, logical_task_ids: impl IntoIterator<Item = String>) -> Self {
        self.scope = Some(logical_task_ids.into_iter().collect());
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    fn transition(&mut self, next: LoopState) {
        tracing::debug!(from = ?self.state, to = ?next, "Convergence state change");
        self.state = next;
    }

    /// Run passes until converged or out of budget.
    ///
    /// Storage failures end the run with an error; the loop does not retry
    /// them.
    pub async fn run(&mut self) -> Result<LoopReport> {
        let started = Instant::now();
        // A budget too large to represent is no deadline at all.
        let deadline = started.checked_add(self.config.max_wall_clock);
        let mut passes: u32 = 0;
        self.transition(LoopState::Selecting);

        loop {
            let mut snap = match snapshot(&**self.executor.store()) {
                Ok(snap) => snap,
                Err(e) => {
                    self.transition(LoopState::Aborted);
                    return Err(e);
                }
            };
            if let Some(scope) = &self.scope {
                snap.retain(|id| scope.contains(id));
            }
            let selected = snap.retries();

            if selected.is_empty() {
                self.transition(LoopState::Converged);
                let report = LoopReport::Converged {
                    passes,
                    succeeded: snap.succeeded(),
                    pending: snap.pending(),
                };
                tracing::info!(passes, elapsed_ms = started.elapsed().as_millis() as u64, "Converged");
                return Ok(report);
            }

            // Wall clock wins when both budgets are spent.
            let budget = if past(deadline) {
                Some(BudgetExceeded::WallClock(self.config.max_wall_clock))
            } else if passes >= self.config.max_iterations {
                Some(BudgetExceeded::Iterations(self.config.max_iterations))
            } else {
                None
            };
            if let Some(budget) = budget {
                self.transition(LoopState::Aborted);
                tracing::warn!(passes, remaining = selected.len(), %budget, "Budget exhausted");
                return Ok(LoopReport::Aborted {
                    passes,
                    remaining: selected.len(),
                    budget,
                });
            }

            self.transition(LoopState::Executing);
            passes += 1;
            tracing::info!(pass = passes, retries = selected.len(), "Starting retry pass");
            if let Err(e) = self.execute_pass(selected, deadline).await {
                self.transition(LoopState::Aborted);
                return Err(e);
            }
            self.transition(LoopState::Selecting);
        }
    }

    /// Run one pass of retries.
    ///
    /// After the first store failure no new attempts start, but attempts
    /// already in flight run to completion and are finished before the
    /// error is returned.
    async fn execute_pass(&self, selected: Vec<RunRecord>, deadline: Option<Instant>) -> Result<()> {
        let executor = &self.executor;
        let failed = AtomicBool::new(false);
        let failed = &failed;
        let mut attempts = stream::iter(selected)
            .map(|record| async move {
                if failed.load(Ordering::SeqCst) {
                    tracing::debug!(task = %record.logical_task_id, "Skipping retry after store failure");
                    return Ok(None);
                }
                if past(deadline) {
                    tracing::debug!(task = %record.logical_task_id, "Skipping retry past deadline");
                    return Ok(None);
                }
                executor.execute_retry(&record).await.map(Some)
            })
            .buffer_unordered(self.config.concurrency);

        let mut first_error = None;
        while let Some(result) = attempts.next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Store failure during retry pass, draining in-flight attempts");
                failed.store(true, Ordering::SeqCst);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn past(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}
