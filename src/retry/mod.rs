//! Retry workflow: classify attempt groups, select retries, execute them,
//! and loop until convergence.

pub mod classify;
pub mod convergence;
pub mod executor;
pub mod select;

pub use classify::{Decision, GroupState, classify};
pub use convergence::{BudgetExceeded, ConvergenceLoop, LoopConfig, LoopReport, LoopState};
pub use executor::RetryExecutor;
pub use select::{Snapshot, select_retries, snapshot};
