// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `runmanager`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "runmanager",
    version,
    about = "Run a workflow of dependent simulation jobs, skipping what is up to date.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the workflow file (TOML).
    #[arg(long, value_name = "PATH", default_value = "Workflow.toml")]
    pub config: String,

    /// Rerun every job, even when its last run is up to date.
    #[arg(long)]
    pub force: bool,

    /// Override `[manager].max_workers`.
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u16).range(1..))]
    pub max_workers: Option<u16>,

    /// Start with the queue paused (nothing is dispatched).
    #[arg(long)]
    pub paused: bool,

    /// Run the job trees persisted in the state store instead of the ones
    /// defined in the workflow file.
    #[arg(long)]
    pub resume: bool,

    /// Parse + validate, print the job trees, but don't run anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `RUNMANAGER_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
