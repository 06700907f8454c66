//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - status: classification of every task in the log directory
//! - tasks: list discovered task manifests
//! - run: first attempts for new tasks, then retry until convergence
//! - retry: retry until convergence
//! - cancel: mark a running attempt cancelled

use clap::{Args, Parser, Subcommand};
use evalloop::storage::Backend;
use std::path::PathBuf;

/// evalloop - retry supervisor for evaluation runs
#[derive(Parser, Debug)]
#[command(name = "evalloop")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log directory holding run records (overrides config)
    #[arg(short, long, global = true)]
    pub log_dir: Option<PathBuf>,

    /// Storage backend: jsonl or sqlite (overrides config)
    #[arg(short, long, global = true)]
    pub backend: Option<Backend>,

    /// Subcommand to execute (default: status)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Budget overrides shared by `run` and `retry`
#[derive(Args, Debug, Clone, Default)]
pub struct LoopArgs {
    /// Maximum retry passes
    #[arg(short = 'n', long)]
    pub max_iterations: Option<u32>,

    /// Wall-clock budget in seconds
    #[arg(short = 'w', long)]
    pub max_wall_clock_secs: Option<u64>,

    /// Retries in flight at once
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the classification of every task in the log directory
    Status {
        /// Also list tasks that already succeeded
        #[arg(short, long)]
        all: bool,
    },

    /// List task manifests
    Tasks {
        /// Filter expression: glob, key=value, key!=value or tag (repeatable)
        #[arg(short, long)]
        filter: Vec<String>,
    },

    /// Run matching tasks that have no record yet, then retry until convergence
    Run {
        /// Filter expression: glob, key=value, key!=value or tag (repeatable)
        #[arg(short, long)]
        filter: Vec<String>,

        #[command(flatten)]
        budget: LoopArgs,
    },

    /// Retry failed tasks until convergence or budget exhaustion
    Retry {
        #[command(flatten)]
        budget: LoopArgs,
    },

    /// Cancel a running attempt
    Cancel {
        /// Attempt ID to cancel
        id: String,

        /// Reason recorded on the attempt
        #[arg(short, long)]
        reason: Option<String>,
    },
}
