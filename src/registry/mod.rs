//! Task registry - maps task names to runner constructors.
//!
//! Tasks are registered explicitly with a constructor function and static
//! metadata. Nothing is discovered by importing or executing task code;
//! manifests (see `manifest`) are plain data.
//!
//! The registry is itself a `TaskRunner`: it dispatches each attempt to the
//! runner constructed for its logical task id.

pub mod filter;
pub mod manifest;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::domain::{Attempt, TaskOutcome};
use crate::error::{EvalLoopError, Result};
use crate::runner::TaskRunner;

pub use filter::{TAGS_KEY, TaskFilter, TaskMetadata};
pub use manifest::{TaskManifest, discover_manifests, load_manifest, register_manifests};

/// Builds the runner for one task from its metadata.
pub type Constructor = Box<dyn Fn(&TaskMetadata) -> Arc<dyn TaskRunner> + Send + Sync>;

struct Entry {
    metadata: TaskMetadata,
    constructor: Constructor,
}

/// Registry of runnable tasks.
#[derive(Default)]
pub struct TaskRegistry {
    entries: BTreeMap<String, Entry>,
    runners: Mutex<BTreeMap<String, Arc<dyn TaskRunner>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task. Names are unique.
    pub fn register<F>(&mut self, name: impl Into<String>, metadata: TaskMetadata, constructor: F) -> Result<()>
    where
        F: Fn(&TaskMetadata) -> Arc<dyn TaskRunner> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(EvalLoopError::Registry(format!("task '{}' is already registered", name)));
        }
        log::debug!("Registered task: {}", name);
        self.entries.insert(
            name,
            Entry {
                metadata,
                constructor: Box::new(constructor),
            },
        );
        Ok(())
    }

    /// Registered task names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn metadata(&self, name: &str) -> Option<&TaskMetadata> {
        self.entries.get(name).map(|e| &e.metadata)
    }

    /// Names of tasks the filter accepts, sorted.
    pub fn filter(&self, filter: &TaskFilter) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(name, entry)| filter.matches(name, &entry.metadata))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Runner for a task, constructed on first use and cached.
    pub fn construct(&self, name: &str) -> Result<Arc<dyn TaskRunner>> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| EvalLoopError::Registry(format!("unknown task '{}'", name)))?;

        let mut runners = self
            .runners
            .lock()
            .map_err(|e| EvalLoopError::Registry(format!("runner cache poisoned: {}", e)))?;
        let runner = runners
            .entry(name.to_string())
            .or_insert_with(|| (entry.constructor)(&entry.metadata));
        Ok(Arc::clone(runner))
    }
}

#[async_trait]
impl TaskRunner for TaskRegistry {
    async fn run(&self, attempt: &Attempt) -> Result<TaskOutcome> {
        let runner = self.construct(&attempt.logical_task_id)?;
        runner.run(attempt).await
    }
}
