// src/dag/task.rs

//! Static task definitions.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::model::{DefaultSection, TaskConfig};
use crate::errors::{IngestError, Result};
use crate::types::{OperatorKind, parse_duration};

/// Canonical task id type used throughout the engine.
pub type TaskId = String;

/// How often, and how patiently, a failing task is retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of retries after the first attempt. `0` means one attempt total.
    pub retries: u32,
    /// Delay before the first retry.
    pub backoff: Duration,
    /// Double the delay after each further failed attempt.
    pub exponential: bool,
    /// Cap for exponential backoff.
    pub max_backoff: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 0,
            backoff: Duration::ZERO,
            exponential: false,
            max_backoff: None,
        }
    }
}

impl RetryPolicy {
    pub fn new(retries: u32, backoff: Duration) -> Self {
        Self {
            retries,
            backoff,
            ..Self::default()
        }
    }

    /// Maximum number of attempts, including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Whether another attempt is allowed after `attempts_made` attempts.
    pub fn allows_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts()
    }

    /// Delay before the retry that follows failed attempt number `attempt`
    /// (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        if !self.exponential {
            return self.backoff;
        }
        let exp = attempt.saturating_sub(1).min(31);
        let delay = self.backoff.saturating_mul(1u32 << exp);
        match self.max_backoff {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

/// A named unit of work: one operator invocation template, its upstream
/// tasks, and its retry policy.
///
/// Immutable once it is part of a [`crate::dag::DependencyGraph`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: TaskId,
    pub kind: OperatorKind,
    /// Raw command line or SQL statement with `{{ token }}` placeholders.
    pub template: String,
    /// Direct upstream task ids.
    pub upstream: Vec<TaskId>,
    pub retry: RetryPolicy,
    /// Per-attempt execution timeout.
    pub timeout: Option<Duration>,
    /// Connection id for sql-statement tasks.
    pub connection: Option<String>,
    /// Working directory for shell-command tasks.
    pub working_dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub transient_exit_codes: Vec<i32>,
}

impl Task {
    pub fn shell(id: impl Into<TaskId>, template: impl Into<String>) -> Self {
        Self::new(id, OperatorKind::ShellCommand, template)
    }

    pub fn sql(
        id: impl Into<TaskId>,
        connection: impl Into<String>,
        template: impl Into<String>,
    ) -> Self {
        let mut task = Self::new(id, OperatorKind::SqlStatement, template);
        task.connection = Some(connection.into());
        task
    }

    pub fn new(id: impl Into<TaskId>, kind: OperatorKind, template: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            template: template.into(),
            upstream: Vec::new(),
            retry: RetryPolicy::default(),
            timeout: None,
            connection: None,
            working_dir: None,
            env: BTreeMap::new(),
            transient_exit_codes: vec![75],
        }
    }

    pub fn after(mut self, upstream: impl Into<TaskId>) -> Self {
        self.upstream.push(upstream.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Build a task from its `[task.<id>]` section, applying `[default]`.
    pub fn from_config(id: &str, cfg: &TaskConfig, defaults: &DefaultSection) -> Result<Self> {
        let duration = |field: &str, value: Option<&str>| -> Result<Option<Duration>> {
            value
                .map(|v| {
                    parse_duration(v).map_err(|e| {
                        IngestError::ConfigError(format!("task '{id}' {field}: {e}"))
                    })
                })
                .transpose()
        };

        let retry = RetryPolicy {
            retries: cfg.effective_retries(defaults),
            backoff: duration("backoff", cfg.effective_backoff(defaults))?.unwrap_or_default(),
            exponential: cfg.exponential_backoff,
            max_backoff: duration("max_backoff", cfg.max_backoff.as_deref())?,
        };

        Ok(Self {
            id: id.to_string(),
            kind: cfg.kind,
            template: cfg.template.clone(),
            upstream: cfg.upstream.clone(),
            retry,
            timeout: duration("timeout", cfg.effective_timeout(defaults))?,
            connection: cfg.connection.clone(),
            working_dir: cfg.effective_working_dir(defaults),
            env: cfg.effective_env(defaults),
            transient_exit_codes: cfg.effective_transient_exit_codes(),
        })
    }
}
