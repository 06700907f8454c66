//! Task manifests - declarative YAML descriptions of runnable tasks.
//!
//! One manifest per file, `*.yml` or `*.yaml`, in a tasks directory:
//!
//! ```yaml
//! name: gsm8k
//! command: python -m evals.gsm8k --resume "$EVALLOOP_RESUME"
//! timeout_ms: 1800000
//! metadata:
//!   suite: reasoning
//!   tags: [math]
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::TaskRegistry;
use super::filter::TaskMetadata;
use crate::error::{EvalLoopError, Result};
use crate::runner::{CommandConfig, CommandRunner, TaskRunner};

/// A task as declared in a manifest file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskManifest {
    pub name: String,
    /// Shell command run for every attempt
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: TaskMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

impl TaskManifest {
    fn validate(&self, path: &Path) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(EvalLoopError::Manifest(format!("{}: name is empty", path.display())));
        }
        if self.command.trim().is_empty() {
            return Err(EvalLoopError::Manifest(format!(
                "{}: task '{}' has an empty command",
                path.display(),
                self.name
            )));
        }
        Ok(())
    }

    /// Command configuration for this task.
    pub fn command_config(&self, output_dir: Option<&Path>, default_timeout_ms: u64) -> CommandConfig {
        let mut config = CommandConfig::new(&self.command).timeout_ms(self.timeout_ms.unwrap_or(default_timeout_ms));
        for (key, value) in &self.env {
            config = config.env(key, value);
        }
        if let Some(dir) = &self.working_dir {
            config = config.working_dir(dir);
        }
        if let Some(dir) = output_dir {
            config = config.output_dir(dir);
        }
        config
    }
}

/// Parse a single manifest file.
pub fn load_manifest(path: impl AsRef<Path>) -> Result<TaskManifest> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|e| EvalLoopError::Manifest(format!("failed to read {}: {}", path.display(), e)))?;
    let manifest: TaskManifest = serde_yaml::from_str(&content)
        .map_err(|e| EvalLoopError::Manifest(format!("failed to parse {}: {}", path.display(), e)))?;
    manifest.validate(path)?;
    Ok(manifest)
}

/// Load every manifest in a directory, sorted by file path.
///
/// A missing directory yields no manifests. Duplicate task names are an error.
pub fn discover_manifests(dir: impl AsRef<Path>) -> Result<Vec<TaskManifest>> {
    let dir = dir.as_ref();
    if !dir.exists() {
        log::debug!("Tasks directory {} does not exist", dir.display());
        return Ok(Vec::new());
    }

    let mut paths = Vec::new();
    for ext in ["yml", "yaml"] {
        let pattern = dir.join(format!("*.{}", ext));
        let pattern = pattern.to_string_lossy();
        let entries = glob::glob(&pattern)
            .map_err(|e| EvalLoopError::Manifest(format!("bad manifest pattern {}: {}", pattern, e)))?;
        paths.extend(entries.filter_map(|entry| entry.ok()));
    }
    paths.sort();

    let mut manifests: Vec<TaskManifest> = Vec::with_capacity(paths.len());
    for path in paths {
        let manifest = load_manifest(&path)?;
        if manifests.iter().any(|m| m.name == manifest.name) {
            return Err(EvalLoopError::Manifest(format!(
                "{}: task '{}' is declared more than once",
                path.display(),
                manifest.name
            )));
        }
        manifests.push(manifest);
    }
    log::info!("Discovered {} task manifests in {}", manifests.len(), dir.display());
    Ok(manifests)
}

/// Register manifests as command-backed tasks. Returns how many were added.
pub fn register_manifests(
    registry: &mut TaskRegistry,
    manifests: &[TaskManifest],
    output_dir: Option<&Path>,
    default_timeout_ms: u64,
) -> Result<usize> {
    for manifest in manifests {
        let config = manifest.command_config(output_dir, default_timeout_ms);
        registry.register(manifest.name.clone(), manifest.metadata.clone(), move |_| {
            Arc::new(CommandRunner::new(config.clone())) as Arc<dyn TaskRunner>
        })?;
    }
    Ok(manifests.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write(dir: &Path, file: &str, content: &str) {
        std::fs::write(dir.join(file), content).unwrap();
    }

    #[test]
    fn test_load_manifest() {
        let temp = TempDir::new().unwrap();
        write(
            temp.path(),
            "gsm8k.yml",
            "name: gsm8k\ncommand: echo hi\ntimeout_ms: 500\nmetadata:\n  suite: reasoning\n  tags: [math]\n",
        );

        let manifest = load_manifest(temp.path().join("gsm8k.yml")).unwrap();
        assert_eq!(manifest.name, "gsm8k");
        assert_eq!(manifest.command, "echo hi");
        assert_eq!(manifest.timeout_ms, Some(500));
        assert_eq!(manifest.metadata["suite"], json!("reasoning"));
        assert_eq!(manifest.metadata["tags"], json!(["math"]));
    }

    #[test]
    fn test_invalid_manifests() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "broken.yml", "name: [unterminated\n");
        write(temp.path(), "empty.yml", "name: t\ncommand: '  '\n");

        assert!(matches!(
            load_manifest(temp.path().join("broken.yml")),
            Err(EvalLoopError::Manifest(_))
        ));
        assert!(matches!(
            load_manifest(temp.path().join("empty.yml")),
            Err(EvalLoopError::Manifest(_))
        ));
        assert!(load_manifest(temp.path().join("missing.yml")).is_err());
    }

    #[test]
    fn test_discover_manifests() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "b.yaml", "name: beta\ncommand: 'true'\n");
        write(temp.path(), "a.yml", "name: alpha\ncommand: 'true'\n");
        write(temp.path(), "notes.txt", "ignored");

        let names: Vec<_> = discover_manifests(temp.path())
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["alpha", "beta"]);
    }

    #[test]
    fn test_discover_missing_dir_is_empty() {
        let temp = TempDir::new().unwrap();
        assert!(discover_manifests(temp.path().join("nope")).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "a.yml", "name: same\ncommand: 'true'\n");
        write(temp.path(), "b.yml", "name: same\ncommand: 'false'\n");
        assert!(discover_manifests(temp.path()).is_err());
    }

    #[test]
    fn test_command_config() {
        let manifest = TaskManifest {
            name: "t".into(),
            command: "run".into(),
            description: None,
            metadata: TaskMetadata::new(),
            timeout_ms: None,
            env: BTreeMap::from([("SEED".to_string(), "1".to_string())]),
            working_dir: Some(PathBuf::from("/tmp")),
        };
        let config = manifest.command_config(Some(Path::new("/out")), 42);
        assert_eq!(config.timeout_ms, 42);
        assert_eq!(config.env, vec![("SEED".to_string(), "1".to_string())]);
        assert_eq!(config.working_dir, Some(PathBuf::from("/tmp")));
        assert_eq!(config.output_dir, Some(PathBuf::from("/out")));
    }

    #[tokio::test]
    async fn test_registered_manifest_runs_command() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "t.yml", "name: echo\ncommand: \"echo 'unit: u1'\"\n");
        let manifests = discover_manifests(temp.path()).unwrap();

        let mut registry = TaskRegistry::new();
        assert_eq!(register_manifests(&mut registry, &manifests, None, 10_000).unwrap(), 1);

        let outcome = registry
            .run(&crate::domain::Attempt {
                logical_task_id: "echo".into(),
                attempt_id: "a1".into(),
                resume_hint: Vec::new(),
            })
            .await
            .unwrap();
        assert_eq!(outcome.status, crate::domain::RunStatus::Success);
        assert_eq!(outcome.completed_units, vec!["u1"]);
    }
}
