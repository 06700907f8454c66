//! Convergence integration tests
//!
//! Drives the retry loop end to end against on-disk stores, with scripted
//! runners and with real shell commands registered from manifests.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use evalloop::domain::{RunRecord, RunStatus};
use evalloop::error::Result;
use evalloop::registry::{TaskFilter, TaskRegistry, discover_manifests, register_manifests};
use evalloop::retry::{BudgetExceeded, ConvergenceLoop, LoopConfig, LoopReport, RetryExecutor, select_retries};
use evalloop::runner::ScriptedRunner;
use evalloop::storage::{Backend, JsonlRecordStore, RecordStore, SqliteRecordStore, open_store};
use tempfile::TempDir;

fn record(task: &str, attempt: &str, status: RunStatus, t: i64) -> RunRecord {
    RunRecord {
        logical_task_id: task.to_string(),
        attempt_id: attempt.to_string(),
        retry_of: None,
        status,
        completed_units: Vec::new(),
        location: None,
        error: None,
        created_at: Utc.timestamp_opt(1_700_000_000 + t, 0).unwrap(),
    }
}

fn seed(store: &dyn RecordStore, records: &[RunRecord]) -> Result<()> {
    for r in records {
        store.append(r)?;
    }
    Ok(())
}

/// Success for A masks its earlier error; only B is selected, and one retry converges.
#[tokio::test]
async fn test_success_masks_error_and_single_retry_converges() -> Result<()> {
    let temp = TempDir::new()?;
    let store = Arc::new(JsonlRecordStore::open(temp.path())?);
    seed(
        &*store,
        &[
            record("A", "a1", RunStatus::Error, 1),
            record("A", "a2", RunStatus::Success, 2),
            record("B", "b1", RunStatus::Error, 1),
        ],
    )?;

    let selected = select_retries(&*store)?;
    assert_eq!(selected.len(), 1);
    assert_eq!(selected[0].attempt_id, "b1");

    let executor = RetryExecutor::new(Arc::clone(&store), Arc::new(ScriptedRunner::new()));
    let retried = executor.execute_retry(&selected[0]).await?;
    assert_eq!(retried.status, RunStatus::Success);

    assert!(select_retries(&*store)?.is_empty());
    Ok(())
}

/// The latest of several failures is the one selected.
#[test]
fn test_latest_failure_selected() -> Result<()> {
    let temp = TempDir::new()?;
    let store = JsonlRecordStore::open(temp.path())?;
    seed(
        &store,
        &[record("C", "c1", RunStatus::Error, 1), record("C", "c2", RunStatus::Error, 2)],
    )?;

    let selected = select_retries(&store)?;
    assert_eq!(selected.len(), 1);
    assert_eq!(selected[0].attempt_id, "c2");
    Ok(())
}

/// One pass allowed, two needed: aborts with one task left.
#[tokio::test]
async fn test_iteration_budget_aborts() -> Result<()> {
    let temp = TempDir::new()?;
    let store = Arc::new(JsonlRecordStore::open(temp.path())?);
    seed(&*store, &[record("D", "d1", RunStatus::Error, 1)])?;

    let runner = Arc::new(ScriptedRunner::new());
    runner.fail_times("D", 1);

    let config = LoopConfig::new(1, Duration::from_secs(60), 1)?;
    let mut convergence = ConvergenceLoop::new(Arc::clone(&store), runner, config)?;
    let report = convergence.run().await?;

    assert_eq!(
        report,
        LoopReport::Aborted {
            passes: 1,
            remaining: 1,
            budget: BudgetExceeded::Iterations(1),
        }
    );
    // Original error plus the failed retry
    assert_eq!(store.list_all()?.len(), 2);
    Ok(())
}

/// Records survive reopening the store, and a second loop picks up where
/// the first stopped.
#[tokio::test]
async fn test_resume_after_reopen() -> Result<()> {
    let temp = TempDir::new()?;
    let runner = Arc::new(ScriptedRunner::new());
    runner.fail_times("E", 2);

    {
        let store = Arc::new(JsonlRecordStore::open(temp.path())?);
        seed(&*store, &[record("E", "e1", RunStatus::Error, 1)])?;
        let config = LoopConfig::new(1, Duration::from_secs(60), 1)?;
        let mut convergence = ConvergenceLoop::new(store, Arc::clone(&runner), config)?;
        assert!(!convergence.run().await?.is_converged());
    }

    let store = Arc::new(JsonlRecordStore::open(temp.path())?);
    let mut convergence = ConvergenceLoop::new(Arc::clone(&store), Arc::clone(&runner), LoopConfig::default())?;
    let report = convergence.run().await?;
    assert!(report.is_converged());
    assert_eq!(report.passes(), 2);
    assert_eq!(runner.call_count("E"), 3);

    let records = store.list_all()?;
    assert_eq!(records.len(), 4);
    assert!(records.iter().all(|r| r.status.is_terminal()));
    Ok(())
}

/// Same workflow on the SQLite backend, with a task still in flight.
#[tokio::test]
async fn test_sqlite_backend_with_pending_task() -> Result<()> {
    let temp = TempDir::new()?;
    let store = Arc::new(SqliteRecordStore::open(temp.path().join("runs.db"))?);
    seed(
        &*store,
        &[
            record("F", "f1", RunStatus::Error, 1),
            record("G", "g1", RunStatus::Error, 1),
            record("G", "g2", RunStatus::Running, 2),
        ],
    )?;

    let runner = Arc::new(ScriptedRunner::new());
    let mut convergence = ConvergenceLoop::new(Arc::clone(&store), Arc::clone(&runner), LoopConfig::default())?;
    let report = convergence.run().await?;

    assert_eq!(
        report,
        LoopReport::Converged {
            passes: 1,
            succeeded: vec!["F".to_string()],
            pending: vec!["G".to_string()],
        }
    );
    assert_eq!(runner.call_count("G"), 0);
    Ok(())
}

/// Manifests on disk, shell commands that resume from completed units.
#[tokio::test]
async fn test_command_tasks_resume_units() -> Result<()> {
    let temp = TempDir::new()?;
    let tasks_dir = temp.path().join("tasks");
    std::fs::create_dir_all(&tasks_dir)?;
    let marker = temp.path().join("first-run-done");

    // Fails after the first unit on the first attempt, then finishes the rest.
    let command = format!(
        r#"if [ ! -e '{m}' ]; then echo 'unit: s1'; touch '{m}'; exit 1; fi; test "$EVALLOOP_RESUME" = s1 && echo 'unit: s2'"#,
        m = marker.display()
    );
    let manifest = format!(
        "name: flaky\ncommand: {}\nmetadata:\n  suite: smoke\n",
        serde_json::to_string(&command)?
    );
    std::fs::write(tasks_dir.join("flaky.yml"), manifest)?;
    std::fs::write(tasks_dir.join("other.yml"), "name: other\ncommand: 'true'\nmetadata:\n  suite: full\n")?;

    let manifests = discover_manifests(&tasks_dir)?;
    let mut registry = TaskRegistry::new();
    register_manifests(&mut registry, &manifests, Some(&temp.path().join("output")), 10_000)?;
    let selected = registry.filter(&TaskFilter::parse(["suite=smoke"])?);
    assert_eq!(selected, vec!["flaky"]);

    let store = open_store(Backend::Jsonl, temp.path().join("runs"))?;
    let registry = Arc::new(registry);
    let executor = RetryExecutor::new(Arc::clone(&store), Arc::clone(&registry));
    let first = executor.execute_fresh("flaky").await?;
    assert_eq!(first.status, RunStatus::Error);
    assert_eq!(first.completed_units, vec!["s1"]);

    let mut convergence = ConvergenceLoop::new(Arc::clone(&store), registry, LoopConfig::default())?.with_scope(selected);
    let report = convergence.run().await?;
    assert!(report.is_converged());

    let records = store.list_all()?;
    let success = records
        .iter()
        .find(|r| r.status == RunStatus::Success)
        .expect("a successful attempt");
    assert_eq!(success.completed_units, vec!["s1", "s2"]);
    assert_eq!(success.retry_of.as_deref(), Some(first.attempt_id.as_str()));
    assert!(success.location.is_some());
    Ok(())
}
