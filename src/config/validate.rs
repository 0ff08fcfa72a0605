// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile, TaskConfig};
use crate::errors::{IngestError, Result};
use crate::types::{OperatorKind, parse_duration};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = IngestError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

/// Validate everything that can be checked without building the graph.
pub fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    validate_pipeline(cfg)?;
    validate_connections(cfg)?;
    validate_defaults(cfg)?;
    for (name, task) in cfg.task.iter() {
        validate_task(cfg, name, task)?;
    }
    Ok(())
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(IngestError::ConfigError(
            "config must contain at least one [task.<id>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_pipeline(cfg: &RawConfigFile) -> Result<()> {
    let p = &cfg.pipeline;

    if p.id.trim().is_empty() {
        return Err(IngestError::ConfigError(
            "[pipeline].id must not be empty".to_string(),
        ));
    }
    if p.concurrency == 0 {
        return Err(IngestError::ConfigError(
            "[pipeline].concurrency must be >= 1 (got 0)".to_string(),
        ));
    }
    if p.max_active_runs == 0 {
        return Err(IngestError::ConfigError(
            "[pipeline].max_active_runs must be >= 1 (got 0)".to_string(),
        ));
    }
    if p.catchup && p.start_date.is_none() {
        return Err(IngestError::ConfigError(
            "[pipeline].catchup = true requires a start_date".to_string(),
        ));
    }
    if let (Some(start), Some(end)) = (p.start_date, p.end_date) {
        if end < start {
            return Err(IngestError::ConfigError(format!(
                "[pipeline].end_date {end} is before start_date {start}"
            )));
        }
    }
    Ok(())
}

fn validate_connections(cfg: &RawConfigFile) -> Result<()> {
    for (id, conn) in cfg.connection.iter() {
        if conn.url.is_none() && conn.url_env.is_none() {
            return Err(IngestError::ConfigError(format!(
                "connection '{id}' needs either `url` or `url_env`"
            )));
        }
        if conn.max_connections == 0 {
            return Err(IngestError::ConfigError(format!(
                "connection '{id}': max_connections must be >= 1"
            )));
        }
        if let Some(ref t) = conn.acquire_timeout {
            check_duration(&format!("connection '{id}' acquire_timeout"), t)?;
        }
    }
    Ok(())
}

fn validate_defaults(cfg: &RawConfigFile) -> Result<()> {
    if let Some(ref b) = cfg.default.backoff {
        check_duration("[default].backoff", b)?;
    }
    if let Some(ref t) = cfg.default.timeout {
        check_duration("[default].timeout", t)?;
    }
    Ok(())
}

fn validate_task(cfg: &RawConfigFile, name: &str, task: &TaskConfig) -> Result<()> {
    match task.kind {
        OperatorKind::SqlStatement => {
            let Some(ref conn) = task.connection else {
                return Err(IngestError::ConfigError(format!(
                    "task '{name}' is an sql-statement task but has no `connection`"
                )));
            };
            if !cfg.connection.contains_key(conn) {
                return Err(IngestError::UnknownConnection {
                    task: name.to_string(),
                    connection: conn.clone(),
                });
            }
        }
        OperatorKind::ShellCommand => {
            if task.connection.is_some() {
                return Err(IngestError::ConfigError(format!(
                    "task '{name}' is a shell-command task and cannot use `connection`"
                )));
            }
        }
    }

    if task.template.trim().is_empty() {
        return Err(IngestError::ConfigError(format!(
            "task '{name}' has an empty template"
        )));
    }

    for (field, value) in [
        ("backoff", task.backoff.as_deref()),
        ("max_backoff", task.max_backoff.as_deref()),
        ("timeout", task.timeout.as_deref()),
    ] {
        if let Some(v) = value {
            check_duration(&format!("task '{name}' {field}"), v)?;
        }
    }

    Ok(())
}

fn check_duration(what: &str, value: &str) -> Result<()> {
    parse_duration(value)
        .map(|_| ())
        .map_err(|e| IngestError::ConfigError(format!("{what}: {e}")))
}
