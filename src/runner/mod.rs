//! Task runners - the boundary to the task-execution substrate.
//!
//! The retry executor only ever calls `TaskRunner::run`. What an attempt
//! actually does (model calls, tools, scoring) lives behind this trait.

mod command;
mod scripted;

use async_trait::async_trait;

use crate::domain::{Attempt, TaskOutcome};
use crate::error::Result;

pub use command::{
    CommandConfig, CommandRunner, ENV_ATTEMPT, ENV_OUTPUT, ENV_RESUME, ENV_TASK, UNIT_PREFIX, parse_units,
};
pub use scripted::ScriptedRunner;

/// Executes one attempt of a logical task.
///
/// Task failure is reported through `TaskOutcome::status`. An `Err` means the
/// runner could not execute the attempt at all; the executor records both
/// cases as an error attempt.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, attempt: &Attempt) -> Result<TaskOutcome>;
}

