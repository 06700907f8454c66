use eyre::{Context, Result};
use evalloop::retry::LoopConfig;
use evalloop::storage::Backend;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub storage: StorageConfig,
    pub retry: RetryConfig,
    pub tasks: TasksConfig,
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("evalloop")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub log_dir: PathBuf,
    pub backend: Backend,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            log_dir: data_dir().join("runs"),
            backend: Backend::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_iterations: u32,
    pub max_wall_clock_secs: u64,
    pub concurrency: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let defaults = LoopConfig::default();
        Self {
            max_iterations: defaults.max_iterations,
            max_wall_clock_secs: defaults.max_wall_clock.as_secs(),
            concurrency: defaults.concurrency,
        }
    }
}

impl RetryConfig {
    pub fn loop_config(&self) -> Result<LoopConfig> {
        LoopConfig::new(
            self.max_iterations,
            Duration::from_secs(self.max_wall_clock_secs),
            self.concurrency,
        )
        .context("Invalid retry configuration")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TasksConfig {
    /// Directory holding task manifests
    pub dir: PathBuf,
    /// Where attempt output is saved; none keeps no output
    pub output_dir: Option<PathBuf>,
    /// Timeout for tasks whose manifest sets none
    pub timeout_ms: u64,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("tasks"),
            output_dir: Some(data_dir().join("output")),
            timeout_ms: 3_600_000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            storage: StorageConfig::default(),
            retry: RetryConfig::default(),
            tasks: TasksConfig::default(),
        }
    }
}

impl Config {
    /// Default env_logger filter, used when RUST_LOG is unset
    pub fn log_filter(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let project_name = env!("CARGO_PKG_NAME");
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.storage.backend, Backend::Jsonl);
        assert_eq!(config.retry.max_iterations, 10);
        assert!(config.retry.loop_config().is_ok());
        assert_eq!(config.tasks.dir, PathBuf::from("tasks"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("evalloop.yml");
        fs::write(
            &path,
            "storage:\n  log_dir: /var/evals\n  backend: sqlite\nretry:\n  concurrency: 8\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.storage.log_dir, PathBuf::from("/var/evals"));
        assert_eq!(config.storage.backend, Backend::Sqlite);
        assert_eq!(config.retry.concurrency, 8);
        assert_eq!(config.retry.max_iterations, 10);
        assert_eq!(config.tasks.timeout_ms, 3_600_000);
    }

    #[test]
    fn test_log_filter() {
        assert_eq!(Config::default().log_filter(), "info");

        let temp = TempDir::new().unwrap();
        let path = temp.path().join("evalloop.yml");
        fs::write(&path, "log_level: debug\n").unwrap();
        assert_eq!(Config::load(Some(&path)).unwrap().log_filter(), "debug");

        let unset = Config {
            log_level: None,
            ..Config::default()
        };
        assert_eq!(unset.log_filter(), "info");
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let temp = TempDir::new().unwrap();
        assert!(Config::load(Some(&temp.path().join("missing.yml"))).is_err());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let retry = RetryConfig {
            concurrency: 0,
            ..RetryConfig::default()
        };
        assert!(retry.loop_config().is_err());
    }
}
