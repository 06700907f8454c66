// Command runner - executes a task attempt as a shell command

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::process::Command;

use super::TaskRunner;
use crate::domain::{Attempt, TaskOutcome};
use crate::error::Result;
use crate::storage::encode_file_stem;

/// Logical task id passed to the command
pub const ENV_TASK: &str = "EVALLOOP_TASK";
/// Attempt id passed to the command
pub const ENV_ATTEMPT: &str = "EVALLOOP_ATTEMPT";
/// Comma-separated units finished by earlier attempts
pub const ENV_RESUME: &str = "EVALLOOP_RESUME";
/// Path the command's combined output is saved to
pub const ENV_OUTPUT: &str = "EVALLOOP_OUTPUT";
/// Stdout lines starting with this prefix report a completed unit
pub const UNIT_PREFIX: &str = "unit:";

/// Configuration for a command runner
#[derive(Debug, Clone)]
pub struct CommandConfig {
    /// The shell command to execute
    pub command: String,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
    /// Working directory (defaults to the current one)
    pub working_dir: Option<PathBuf>,
    /// Directory attempt output is saved under
    pub output_dir: Option<PathBuf>,
    /// Timeout in milliseconds (default: 3600000)
    pub timeout_ms: u64,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            env: Vec::new(),
            working_dir: None,
            output_dir: None,
            timeout_ms: 3_600_000,
        }
    }
}

impl CommandConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = ms;
        self
    }
}

/// Runner that executes `sh -c <command>` for each attempt.
///
/// Exit code 0 is success. Any other exit, a timeout, or a failure to
/// spawn is an error outcome. Units reported before a failure are kept.
pub struct CommandRunner {
    config: CommandConfig,
}

impl CommandRunner {
    pub fn new(config: CommandConfig) -> Self {
        Self { config }
    }

    pub fn command(&self) -> &str {
        &self.config.command
    }

    fn output_path(&self, attempt: &Attempt) -> Option<PathBuf> {
        self.config.output_dir.as_ref().map(|dir| {
            dir.join(encode_file_stem(&attempt.logical_task_id))
                .join(format!("{}.log", attempt.attempt_id))
        })
    }

    async fn save_output(&self, path: &Path, stdout: &[u8], stderr: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut combined = stdout.to_vec();
        combined.extend_from_slice(stderr);
        tokio::fs::write(path, combined).await
    }
}

/// Collect `unit: <id>` lines from command stdout.
pub fn parse_units(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| line.trim().strip_prefix(UNIT_PREFIX))
        .map(|unit| unit.trim().to_string())
        .filter(|unit| !unit.is_empty())
        .collect()
}

#[async_trait]
impl TaskRunner for CommandRunner {
    async fn run(&self, attempt: &Attempt) -> Result<TaskOutcome> {
        let output_path = self.output_path(attempt);

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&self.config.command);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.config.env {
            cmd.env(key, value);
        }
        cmd.env(ENV_TASK, &attempt.logical_task_id)
            .env(ENV_ATTEMPT, &attempt.attempt_id)
            .env(ENV_RESUME, attempt.resume_hint.join(","));
        if let Some(path) = &output_path {
            cmd.env(ENV_OUTPUT, path);
        }
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);

        debug!(
            "Running attempt {} of {}: {}",
            attempt.attempt_id, attempt.logical_task_id, self.config.command
        );
        let child = cmd.spawn()?;

        let timeout = tokio::time::Duration::from_millis(self.config.timeout_ms);
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Ok(TaskOutcome::error(format!(
                    "Command timed out after {}ms",
                    self.config.timeout_ms
                )));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let units = parse_units(&stdout);

        let mut outcome = if output.status.success() {
            TaskOutcome::success(units)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let mut message = format!("Command exited with code: {:?}", output.status.code());
            if let Some(last) = stderr.lines().rev().find(|l| !l.trim().is_empty()) {
                message.push_str(&format!(": {}", last.trim()));
            }
            TaskOutcome::error(message).with_units(units)
        };

        if let Some(path) = output_path {
            match self.save_output(&path, &output.stdout, &output.stderr).await {
                Ok(()) => outcome = outcome.with_location(path.display().to_string()),
                Err(e) => warn!("Failed to save output to {}: {}", path.display(), e),
            }
        }

        Ok(outcome)
    }
}
