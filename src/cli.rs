// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, ValueEnum};

use crate::config::loader::default_config_path;

/// Command-line arguments for `ingestdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "ingestdag",
    version,
    about = "Run a daily ingestion pipeline as a dependency graph of shell and SQL tasks.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the pipeline file (TOML).
    ///
    /// Default: `Pipeline.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value_os_t = default_config_path())]
    pub config: PathBuf,

    /// Run the pipeline for a single logical date (YYYY-MM-DD).
    #[arg(long, value_name = "DATE", conflicts_with_all = ["start", "end"])]
    pub date: Option<NaiveDate>,

    /// First date of a backfill range (inclusive). Requires `--end`.
    #[arg(long, value_name = "DATE", requires = "end")]
    pub start: Option<NaiveDate>,

    /// Last date of a backfill range (inclusive). Requires `--start`.
    #[arg(long, value_name = "DATE", requires = "start")]
    pub end: Option<NaiveDate>,

    /// Override `pipeline.concurrency` (operator invocations in flight).
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Override `pipeline.max_active_runs` (dates running at once).
    #[arg(long, value_name = "N")]
    pub max_active_runs: Option<usize>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `INGESTDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the DAG and rendered templates, but don't
    /// execute anything.
    #[arg(long)]
    pub dry_run: bool,
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

/// Which dates a CLI invocation asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateSelection {
    /// `--date`
    Single(NaiveDate),
    /// `--start` / `--end`
    Range(NaiveDate, NaiveDate),
    /// Neither: whatever the pipeline's schedule says is due today.
    Scheduled,
}

impl CliArgs {
    pub fn date_selection(&self) -> DateSelection {
        match (self.date, self.start, self.end) {
            (Some(d), _, _) => DateSelection::Single(d),
            (None, Some(s), Some(e)) => DateSelection::Range(s, e),
            _ => DateSelection::Scheduled,
        }
    }
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
