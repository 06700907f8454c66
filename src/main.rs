use clap::Parser;
use colored::*;
use eyre::{Context, Result, bail, eyre};
use futures::stream::{self, StreamExt};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use evalloop::domain::{RunRecord, RunStatus};
use evalloop::registry::{TaskFilter, TaskManifest, TaskRegistry, discover_manifests, register_manifests};
use evalloop::retry::{ConvergenceLoop, Decision, LoopConfig, LoopReport, RetryExecutor, snapshot};
use evalloop::runner::TaskRunner;
use evalloop::storage::{RecordStore, find_attempt, open_store};

mod cli;
mod config;

use cli::Cli;
use cli::commands::{Commands, LoopArgs};
use config::Config;

fn setup_logging(default_filter: &str) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("evalloop")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("evalloop.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

/// Log directory and backend after CLI overrides
fn open_records(cli: &Cli, config: &Config) -> Result<Arc<dyn RecordStore>> {
    let log_dir = cli.log_dir.clone().unwrap_or_else(|| config.storage.log_dir.clone());
    let backend = cli.backend.unwrap_or(config.storage.backend);
    info!("Opening {:?} record store at {}", backend, log_dir.display());
    open_store(backend, &log_dir).context(format!("Failed to open record store at {}", log_dir.display()))
}

fn load_manifests(config: &Config) -> Result<Vec<TaskManifest>> {
    discover_manifests(&config.tasks.dir).context(format!(
        "Failed to load task manifests from {}",
        config.tasks.dir.display()
    ))
}

fn build_registry(config: &Config, manifests: &[TaskManifest]) -> Result<TaskRegistry> {
    let mut registry = TaskRegistry::new();
    register_manifests(
        &mut registry,
        manifests,
        config.tasks.output_dir.as_deref(),
        config.tasks.timeout_ms,
    )
    .context("Failed to register tasks")?;
    Ok(registry)
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        None => handle_status_command(false, cli, config),
        Some(Commands::Status { all }) => handle_status_command(*all, cli, config),
        Some(Commands::Tasks { filter }) => handle_tasks_command(filter, cli, config),
        Some(Commands::Run { filter, budget }) => handle_run_command(filter, budget, cli, config).await,
        Some(Commands::Retry { budget }) => handle_retry_command(budget, cli, config).await,
        Some(Commands::Cancel { id, reason }) => handle_cancel_command(id, reason.as_deref(), cli, config),
    }
}

fn handle_status_command(all: bool, cli: &Cli, config: &Config) -> Result<()> {
    let store = open_records(cli, config)?;
    let snap = snapshot(&*store).context("Failed to read run records")?;
    info!("Status: {} logical tasks", snap.len());

    if snap.is_empty() {
        println!("{}", "No run records found".yellow());
        return Ok(());
    }

    for (id, decision) in snap.decisions() {
        let attempts = snap.attempts(id);
        match decision {
            Decision::Done if !all => {}
            Decision::Done => println!("{} {} ({} attempts)", "done   ".green(), id, attempts),
            Decision::Pending => println!("{} {} ({} attempts)", "pending".yellow(), id, attempts),
            Decision::Retry(record) => {
                println!("{} {} ({} attempts)", "retry  ".red(), id, attempts);
                print_failure(record, cli.is_verbose());
            }
        }
    }

    println!(
        "{} {} done, {} pending, {} to retry",
        "Summary:".cyan(),
        snap.succeeded().len(),
        snap.pending().len(),
        snap.retries().len()
    );
    Ok(())
}

fn print_failure(record: &RunRecord, verbose: bool) {
    println!("    last attempt {} ({})", record.attempt_id, record.status);
    if let Some(error) = &record.error {
        println!("    {}", error.dimmed());
    }
    if verbose {
        println!("    {} units completed", record.completed_units.len());
        if let Some(location) = &record.location {
            println!("    output: {}", location);
        }
    }
}

fn handle_tasks_command(filter: &[String], cli: &Cli, config: &Config) -> Result<()> {
    let filter = TaskFilter::parse(filter).context("Invalid task filter")?;
    let manifests = load_manifests(config)?;
    info!("Listing tasks matching {}", filter);

    let mut shown = 0;
    for manifest in manifests.iter().filter(|m| filter.matches(&m.name, &m.metadata)) {
        shown += 1;
        match &manifest.description {
            Some(description) => println!("{} - {}", manifest.name.green(), description),
            None => println!("{}", manifest.name.green()),
        }
        if cli.is_verbose() {
            println!("    command: {}", manifest.command);
            for (key, value) in &manifest.metadata {
                println!("    {}: {}", key, value);
            }
        }
    }
    println!("{} {} of {} tasks", "Matched:".cyan(), shown, manifests.len());
    Ok(())
}

fn effective_loop_config(budget: &LoopArgs, config: &Config) -> Result<LoopConfig> {
    let mut retry = config.retry.clone();
    if let Some(n) = budget.max_iterations {
        retry.max_iterations = n;
    }
    if let Some(secs) = budget.max_wall_clock_secs {
        retry.max_wall_clock_secs = secs;
    }
    if let Some(j) = budget.concurrency {
        retry.concurrency = j;
    }
    retry.loop_config()
}

async fn handle_run_command(filter: &[String], budget: &LoopArgs, cli: &Cli, config: &Config) -> Result<()> {
    let loop_config = effective_loop_config(budget, config)?;
    let filter = TaskFilter::parse(filter).context("Invalid task filter")?;
    let manifests = load_manifests(config)?;
    let registry = Arc::new(build_registry(config, &manifests)?);
    let selected = registry.filter(&filter);
    if selected.is_empty() {
        println!("{} no tasks match {}", "Nothing to run:".yellow(), filter);
        return Ok(());
    }

    let store = open_records(cli, config)?;
    let snap = snapshot(&*store).context("Failed to read run records")?;
    let fresh: Vec<&String> = selected.iter().filter(|name| !snap.contains(name)).collect();
    info!("Run: {} tasks selected, {} without records", selected.len(), fresh.len());
    println!(
        "{} {} tasks ({} first attempts)",
        "Running:".cyan(),
        selected.len(),
        fresh.len()
    );

    {
        let executor = RetryExecutor::new(Arc::clone(&store), Arc::clone(&registry));
        let mut first_attempts = stream::iter(fresh)
            .map(|name| executor.execute_fresh(name))
            .buffer_unordered(loop_config.concurrency);
        while let Some(result) = first_attempts.next().await {
            let record = result.context("Failed to record attempt")?;
            print_attempt(&record);
        }
    }

    let convergence = ConvergenceLoop::new(store, registry, loop_config)?.with_scope(selected);
    drive(convergence).await
}

async fn handle_retry_command(budget: &LoopArgs, cli: &Cli, config: &Config) -> Result<()> {
    let loop_config = effective_loop_config(budget, config)?;
    let manifests = load_manifests(config)?;
    let registry = Arc::new(build_registry(config, &manifests)?);
    let store = open_records(cli, config)?;

    let unknown: Vec<String> = snapshot(&*store)
        .context("Failed to read run records")?
        .retries()
        .into_iter()
        .map(|r| r.logical_task_id)
        .filter(|id| !registry.contains(id))
        .collect();
    for id in &unknown {
        log::warn!("Task {} needs a retry but has no manifest", id);
        println!("{} {} has no manifest, skipping", "Warning:".yellow(), id);
    }

    let names = registry.names();
    let convergence = ConvergenceLoop::new(store, registry, loop_config)?.with_scope(names);
    drive(convergence).await
}

fn print_attempt(record: &RunRecord) {
    let status = match record.status {
        RunStatus::Success => record.status.as_str().green(),
        _ => record.status.as_str().red(),
    };
    println!("  {} {} ({})", status, record.logical_task_id, record.attempt_id);
}

async fn drive<S, R>(mut convergence: ConvergenceLoop<S, R>) -> Result<()>
where
    S: RecordStore + ?Sized,
    R: TaskRunner + ?Sized,
{
    let report = convergence.run().await.context("Retry loop failed")?;
    match report {
        LoopReport::Converged {
            passes,
            succeeded,
            pending,
        } => {
            println!(
                "{} after {} passes: {} succeeded, {} still running",
                "Converged".green(),
                passes,
                succeeded.len(),
                pending.len()
            );
            for id in pending {
                println!("  {} {}", "pending".yellow(), id);
            }
            Ok(())
        }
        LoopReport::Aborted {
            passes,
            remaining,
            budget,
        } => {
            println!(
                "{} after {} passes: {} tasks still failing",
                "Aborted".red(),
                passes,
                remaining
            );
            bail!("{} exhausted with {} tasks left to retry", budget, remaining)
        }
    }
}

fn handle_cancel_command(id: &str, reason: Option<&str>, cli: &Cli, config: &Config) -> Result<()> {
    info!("Cancelling attempt: {}", id);
    let store = open_records(cli, config)?;
    let record = find_attempt(&*store, id)
        .context("Failed to read run records")?
        .ok_or_else(|| eyre!("No attempt with id {}", id))?;

    if record.status.is_terminal() {
        bail!("Attempt {} of {} is already {}", id, record.logical_task_id, record.status);
    }

    let cancelled = record.cancelled(reason.unwrap_or("cancelled by operator"));
    store.finish(&cancelled).context(format!("Failed to cancel attempt {}", id))?;
    println!("{} {} ({})", "Cancelled:".red(), id, record.logical_task_id);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration; it carries the default log level
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // Setup logging (RUST_LOG still overrides the configured level)
    setup_logging(config.log_filter()).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
