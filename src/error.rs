//! Error types for evalloop
//!
//! Centralized error handling using thiserror. Task failures are never
//! represented here: they are recorded as data on a `RunRecord`. Everything
//! in this enum is an infrastructure or caller error.

use thiserror::Error;

/// All error types that can occur in evalloop
#[derive(Debug, Error)]
pub enum EvalLoopError {
    /// Record store unreachable, corrupted, or rejected a write
    #[error("Storage error: {0}")]
    Storage(String),

    /// No record exists for the attempt
    #[error("Attempt not found: {0}")]
    AttemptNotFound(String),

    /// The attempt already reached a terminal status and is frozen
    #[error("Attempt already finalized: {0}")]
    AttemptFinalized(String),

    /// Classifier input was empty or mixed several logical tasks
    #[error("Invalid record group: {0}")]
    InvalidGroup(String),

    /// Invalid state transition or operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Invalid loop or runner configuration
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Task registration or lookup failure
    #[error("Registry error: {0}")]
    Registry(String),

    /// Task manifest could not be parsed
    #[error("Manifest error: {0}")]
    Manifest(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl EvalLoopError {
    /// Returns true for failures of the backing store.
    ///
    /// Callers treat these as retryable at the infrastructure level; the
    /// convergence loop never retries them itself.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            EvalLoopError::Storage(_)
                | EvalLoopError::AttemptNotFound(_)
                | EvalLoopError::AttemptFinalized(_)
                | EvalLoopError::Io(_)
                | EvalLoopError::Json(_)
                | EvalLoopError::Sqlite(_)
        )
    }
}

/// Result type alias for evalloop operations
pub type Result<T> = std::result::Result<T, EvalLoopError>;
