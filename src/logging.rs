// src/logging.rs

//! Logging setup for `ingestdag` using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the filter:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `INGESTDAG_LOG` environment variable, either a bare level ("debug")
//!    or a full filter ("ingestdag=debug,sqlx=warn")
//! 3. default to `info`
//!
//! Logs are sent to STDERR so that stdout carries only run summaries and
//! dry-run output.

use anyhow::Result;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use crate::cli::LogLevel;

/// Environment variable read when no `--log-level` is given.
pub const LOG_ENV_VAR: &str = "INGESTDAG_LOG";

/// Initialise global logging subscriber.
///
/// Safe to call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let filter = match cli_level {
        Some(lvl) => EnvFilter::new(level_from_log_level(lvl).as_str()),
        None => match std::env::var(LOG_ENV_VAR) {
            Ok(spec) if !spec.trim().is_empty() => filter_from_str(&spec)?,
            _ => EnvFilter::new(tracing::Level::INFO.as_str()),
        },
    };

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("installing log subscriber: {e}"))?;

    Ok(())
}

fn level_from_log_level(lvl: LogLevel) -> tracing::Level {
    match lvl {
        LogLevel::Error => tracing::Level::ERROR,
        LogLevel::Warn => tracing::Level::WARN,
        LogLevel::Info => tracing::Level::INFO,
        LogLevel::Debug => tracing::Level::DEBUG,
        LogLevel::Trace => tracing::Level::TRACE,
    }
}

/// Accept "warning" as an alias, then defer to `EnvFilter` directive syntax.
fn filter_from_str(s: &str) -> Result<EnvFilter> {
    let s = s.trim();
    let spec = if s.eq_ignore_ascii_case("warning") {
        "warn"
    } else {
        s
    };
    EnvFilter::try_new(spec).map_err(|e| anyhow::anyhow!("invalid {LOG_ENV_VAR} value '{s}': {e}"))
}

