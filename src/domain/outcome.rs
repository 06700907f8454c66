//! Attempt input and outcome types.
//!
//! These cross the boundary to the task-execution substrate: an `Attempt`
//! goes out, a `TaskOutcome` comes back.

use super::run_record::RunStatus;

/// Everything a runner needs to execute one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub logical_task_id: String,
    pub attempt_id: String,
    /// Units finished by earlier attempts; runners may skip them
    pub resume_hint: Vec<String>,
}

/// Result reported by the task-execution substrate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub status: RunStatus,
    /// Units completed during this attempt
    pub completed_units: Vec<String>,
    pub location: Option<String>,
    pub error: Option<String>,
}

impl TaskOutcome {
    /// Successful outcome
    pub fn success(completed_units: Vec<String>) -> Self {
        Self {
            status: RunStatus::Success,
            completed_units,
            location: None,
            error: None,
        }
    }

    /// Failed outcome
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Error,
            completed_units: Vec::new(),
            location: None,
            error: Some(message.into()),
        }
    }

    /// Attach units finished before the failure
    pub fn with_units(mut self, units: Vec<String>) -> Self {
        self.completed_units = units;
        self
    }

    /// Attach the output location
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

/// Append `new` units after `prior`, skipping ones already present.
///
/// Keeps the prior ordering as a prefix so progress only ever grows.
pub fn merge_units(prior: &[String], new: &[String]) -> Vec<String> {
    let mut merged = prior.to_vec();
    for unit in new {
        if !merged.contains(unit) {
            merged.push(unit.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_merge_units_keeps_prior_prefix() {
        let merged = merge_units(&units(&["a", "b"]), &units(&["b", "c"]));
        assert_eq!(merged, units(&["a", "b", "c"]));
    }

    #[test]
    fn test_merge_units_when_runner_restarts_from_scratch() {
        let merged = merge_units(&units(&["a", "b"]), &units(&["a"]));
        assert_eq!(merged, units(&["a", "b"]));
    }

    #[test]
    fn test_outcome_builders() {
        let outcome = TaskOutcome::error("timed out")
            .with_units(units(&["s1"]))
            .with_location("/logs/x.log");
        assert_eq!(outcome.status, RunStatus::Error);
        assert_eq!(outcome.error.as_deref(), Some("timed out"));
        assert_eq!(outcome.completed_units, units(&["s1"]));
        assert_eq!(outcome.location.as_deref(), Some("/logs/x.log"));
    }
}
