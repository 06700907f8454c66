//! Run record and related types
//!
//! A RunRecord is one execution attempt of a logical task. It is created
//! `running` when the attempt starts, finalized once by its owning executor
//! (or externally as cancelled) and frozen from then on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{generate_attempt_id, now};

/// One attempt of a logical task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    //=== Identity ===
    /// Stable identifier shared by every attempt of the same task
    pub logical_task_id: String,

    /// Unique identifier for this attempt (never reused)
    pub attempt_id: String,

    /// Attempt this one retries (None for a first attempt)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_of: Option<String>,

    //=== Outcome ===
    pub status: RunStatus,

    /// Sub-units that finished successfully, in completion order
    #[serde(default)]
    pub completed_units: Vec<String>,

    /// Where the attempt's full output is persisted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    /// Failure message for error/cancelled attempts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    //=== Timestamps ===
    pub created_at: DateTime<Utc>,
}

/// Status of an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Error,
    Cancelled,
    /// In flight; only the owning executor may finalize it
    Running,
}

impl RunStatus {
    /// Returns true once the attempt is frozen
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }

    /// Returns true for statuses that make the task eligible for retry
    pub fn is_failure(&self) -> bool {
        matches!(self, RunStatus::Error | RunStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Error => "error",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Running => "running",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(RunStatus::Success),
            "error" => Ok(RunStatus::Error),
            "cancelled" => Ok(RunStatus::Cancelled),
            "running" => Ok(RunStatus::Running),
            other => Err(format!("unknown run status: {}", other)),
        }
    }
}

impl RunRecord {
    /// Start a first attempt of a logical task
    pub fn start(logical_task_id: impl Into<String>) -> Self {
        Self {
            logical_task_id: logical_task_id.into(),
            attempt_id: generate_attempt_id(),
            retry_of: None,
            status: RunStatus::Running,
            completed_units: Vec::new(),
            location: None,
            error: None,
            created_at: now(),
        }
    }

    /// Start a retry of `previous`, carrying its completed units forward
    ///
    /// `created_at` is forced strictly after the retried record so the new
    /// attempt always sorts as the most recent one, even under clock skew.
    pub fn start_retry(previous: &RunRecord) -> Self {
        let floor = previous.created_at + chrono::Duration::microseconds(1);
        Self {
            logical_task_id: previous.logical_task_id.clone(),
            attempt_id: generate_attempt_id(),
            retry_of: Some(previous.attempt_id.clone()),
            status: RunStatus::Running,
            completed_units: previous.completed_units.clone(),
            location: None,
            error: None,
            created_at: std::cmp::max(now(), floor),
        }
    }

    /// Recency key: newer `created_at` wins, ties go to the greater attempt id
    pub fn recency(&self) -> (DateTime<Utc>, &str) {
        (self.created_at, self.attempt_id.as_str())
    }

    /// True if `self` is more recent than `other`
    pub fn is_newer_than(&self, other: &RunRecord) -> bool {
        self.recency() > other.recency()
    }

    /// Terminal copy of this attempt with the given status
    pub fn finalized(&self, status: RunStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }

    /// Terminal cancelled copy of this attempt
    pub fn cancelled(&self, reason: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Cancelled,
            error: Some(reason.into()),
            ..self.clone()
        }
    }
}
