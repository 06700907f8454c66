//! evalloop - retry supervisor for batches of evaluation runs
//!
//! Tracks attempt outcomes in a run record store, classifies which logical
//! tasks still need work, and re-executes them until every task has
//! succeeded or a budget runs out.

pub mod domain;
pub mod error;
pub mod id;
pub mod registry;
pub mod retry;
pub mod runner;
pub mod storage;

pub use error::{EvalLoopError, Result};
