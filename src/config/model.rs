// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::types::OperatorKind;

/// Top-level configuration as read from a TOML file, before validation.
///
/// ```toml
/// [pipeline]
/// id = "fintech_raw_ingestion"
/// start_date = "2023-06-01"
/// catchup = true
///
/// [connection.snowflake_default]
/// url_env = "WAREHOUSE_URL"
///
/// [task.load_raw_users]
/// kind = "sql-statement"
/// connection = "snowflake_default"
/// template = "COPY INTO RAW.RAW_USERS FROM @STAGE/raw_users_{{ ds }}.csv"
///
/// [task.load_raw_merchants]
/// kind = "sql-statement"
/// connection = "snowflake_default"
/// template = "..."
/// upstream = ["load_raw_users"]
/// ```
///
/// Use [`ConfigFile::try_from`] to turn this into a validated [`ConfigFile`].
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    /// Pipeline identity and scheduling from `[pipeline]`.
    pub pipeline: PipelineSection,

    /// Task defaults from `[default]`.
    #[serde(default)]
    pub default: DefaultSection,

    /// Warehouse connections from `[connection.<id>]`.
    #[serde(default)]
    pub connection: BTreeMap<String, ConnectionConfig>,

    /// All tasks from `[task.<id>]`, keyed by task id.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,
}

/// Validated configuration.
///
/// Only constructible through `TryFrom<RawConfigFile>` (see
/// `config::validate`), so holders can rely on connection references and
/// duration strings being well-formed. Graph-level checks (upstream
/// references, cycles, template tokens) happen in
/// [`crate::dag::DependencyGraph::build`].
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub pipeline: PipelineSection,
    pub default: DefaultSection,
    pub connection: BTreeMap<String, ConnectionConfig>,
    pub task: BTreeMap<String, TaskConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            pipeline: raw.pipeline,
            default: raw.default,
            connection: raw.connection,
            task: raw.task,
        }
    }
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    /// Pipeline (graph) id used by the trigger interface.
    pub id: String,

    /// First logical date the pipeline is scheduled for.
    #[serde(default)]
    pub start_date: Option<NaiveDate>,

    /// Last logical date the pipeline is scheduled for (inclusive).
    #[serde(default)]
    pub end_date: Option<NaiveDate>,

    /// If true, a scheduled trigger runs every missed date since
    /// `start_date`; otherwise only the latest completed day.
    #[serde(default)]
    pub catchup: bool,

    /// Task-level concurrency: how many operator invocations may be in
    /// flight at once across all dates of one trigger.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Date-level concurrency: how many DAG runs may be active at once.
    #[serde(default = "default_max_active_runs")]
    pub max_active_runs: usize,
}

fn default_concurrency() -> usize {
    4
}

fn default_max_active_runs() -> usize {
    1
}

/// `[default]` section: values applied to tasks that do not set them.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DefaultSection {
    #[serde(default)]
    pub retries: Option<u32>,

    /// Backoff between attempts, e.g. `"5m"`.
    #[serde(default)]
    pub backoff: Option<String>,

    /// Per-attempt execution timeout, e.g. `"1h"`.
    #[serde(default)]
    pub timeout: Option<String>,

    /// Working directory for shell tasks.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Environment variables exported to shell tasks.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// `[connection.<id>]` section.
///
/// Credentials are not stored here directly when avoidable: `url_env` names
/// an environment variable that is resolved when the pool is created.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub url_env: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long to wait for a free pooled connection, e.g. `"30s"`.
    #[serde(default)]
    pub acquire_timeout: Option<String>,
}

fn default_max_connections() -> u32 {
    4
}

/// `[task.<id>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    /// `"shell-command"` or `"sql-statement"`.
    pub kind: OperatorKind,

    /// Command line or SQL statement, with `{{ token }}` placeholders.
    pub template: String,

    /// Tasks that must succeed (for the same date) before this one runs.
    #[serde(default)]
    pub upstream: Vec<String>,

    /// Retry limit; falls back to `default.retries`, then 0.
    #[serde(default)]
    pub retries: Option<u32>,

    /// Delay before each retry; falls back to `default.backoff`, then 0s.
    #[serde(default)]
    pub backoff: Option<String>,

    /// Double the backoff after every failed attempt.
    #[serde(default)]
    pub exponential_backoff: bool,

    /// Upper bound for exponential backoff.
    #[serde(default)]
    pub max_backoff: Option<String>,

    /// Per-attempt execution timeout.
    #[serde(default)]
    pub timeout: Option<String>,

    /// Connection id (sql-statement tasks only).
    #[serde(default)]
    pub connection: Option<String>,

    /// Working directory (shell-command tasks only).
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Extra environment variables (shell-command tasks only); merged over
    /// `default.env`.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Exit codes treated as transient (shell-command tasks only).
    ///
    /// Defaults to `[75]` (`EX_TEMPFAIL`).
    #[serde(default)]
    pub transient_exit_codes: Option<Vec<i32>>,
}

impl TaskConfig {
    pub fn effective_retries(&self, defaults: &DefaultSection) -> u32 {
        self.retries.or(defaults.retries).unwrap_or(0)
    }

    pub fn effective_backoff<'a>(&'a self, defaults: &'a DefaultSection) -> Option<&'a str> {
        self.backoff.as_deref().or(defaults.backoff.as_deref())
    }

    pub fn effective_timeout<'a>(&'a self, defaults: &'a DefaultSection) -> Option<&'a str> {
        self.timeout.as_deref().or(defaults.timeout.as_deref())
    }

    pub fn effective_working_dir(&self, defaults: &DefaultSection) -> Option<PathBuf> {
        self.working_dir
            .clone()
            .or_else(|| defaults.working_dir.clone())
    }

    pub fn effective_env(&self, defaults: &DefaultSection) -> BTreeMap<String, String> {
        let mut env = defaults.env.clone();
        env.extend(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env
    }

    pub fn effective_transient_exit_codes(&self) -> Vec<i32> {
        self.transient_exit_codes.clone().unwrap_or_else(|| vec![75])
    }
}
