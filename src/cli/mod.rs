//! CLI module for evalloop - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for inspecting the run
//! log, listing tasks, running and retrying them, and cancelling attempts.

pub mod commands;

pub use commands::Cli;
