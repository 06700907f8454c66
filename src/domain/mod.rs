//! Domain types for evalloop
//!
//! - RunRecord: one attempt of a logical task, with its status and progress
//! - Attempt / TaskOutcome: what goes to and comes back from a task runner

pub mod outcome;
pub mod run_record;

pub use outcome::{Attempt, TaskOutcome, merge_units};
pub use run_record::{RunRecord, RunStatus};
