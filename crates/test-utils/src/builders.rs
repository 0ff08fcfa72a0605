#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::NaiveDate;
use ingestdag::config::{
    ConfigFile, ConnectionConfig, DefaultSection, PipelineSection, RawConfigFile, TaskConfig,
};
use ingestdag::types::OperatorKind;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new(pipeline_id: &str) -> Self {
        Self {
            config: RawConfigFile {
                pipeline: PipelineSection {
                    id: pipeline_id.to_string(),
                    start_date: None,
                    end_date: None,
                    catchup: false,
                    concurrency: 4,
                    max_active_runs: 1,
                },
                default: DefaultSection::default(),
                connection: BTreeMap::new(),
                task: BTreeMap::new(),
            },
        }
    }

    pub fn with_task(mut self, name: &str, task: TaskConfig) -> Self {
        self.config.task.insert(name.to_string(), task);
        self
    }

    pub fn with_connection(mut self, id: &str, url: &str) -> Self {
        self.config.connection.insert(
            id.to_string(),
            ConnectionConfig {
                url: Some(url.to_string()),
                url_env: None,
                max_connections: 4,
                acquire_timeout: None,
            },
        );
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.pipeline.concurrency = n;
        self
    }

    pub fn max_active_runs(mut self, n: usize) -> Self {
        self.config.pipeline.max_active_runs = n;
        self
    }

    pub fn start_date(mut self, d: NaiveDate) -> Self {
        self.config.pipeline.start_date = Some(d);
        self
    }

    pub fn end_date(mut self, d: NaiveDate) -> Self {
        self.config.pipeline.end_date = Some(d);
        self
    }

    pub fn catchup(mut self, val: bool) -> Self {
        self.config.pipeline.catchup = val;
        self
    }

    pub fn default_retries(mut self, n: u32) -> Self {
        self.config.default.retries = Some(n);
        self
    }

    pub fn default_backoff(mut self, d: &str) -> Self {
        self.config.default.backoff = Some(d.to_string());
        self
    }

    pub fn default_env(mut self, key: &str, value: &str) -> Self {
        self.config.default.env.insert(key.to_string(), value.to_string());
        self
    }

    /// The raw config, for tests that exercise validation failures.
    pub fn build_raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn shell(template: &str) -> Self {
        Self::new(OperatorKind::ShellCommand, template)
    }

    pub fn sql(connection: &str, template: &str) -> Self {
        let mut b = Self::new(OperatorKind::SqlStatement, template);
        b.task.connection = Some(connection.to_string());
        b
    }

    pub fn new(kind: OperatorKind, template: &str) -> Self {
        Self {
            task: TaskConfig {
                kind,
                template: template.to_string(),
                upstream: vec![],
                retries: None,
                backoff: None,
                exponential_backoff: false,
                max_backoff: None,
                timeout: None,
                connection: None,
                working_dir: None,
                env: BTreeMap::new(),
                transient_exit_codes: None,
            },
        }
    }

    pub fn upstream(mut self, dep: &str) -> Self {
        self.task.upstream.push(dep.to_string());
        self
    }

    pub fn retries(mut self, n: u32) -> Self {
        self.task.retries = Some(n);
        self
    }

    pub fn backoff(mut self, d: &str) -> Self {
        self.task.backoff = Some(d.to_string());
        self
    }

    pub fn exponential_backoff(mut self, max: Option<&str>) -> Self {
        self.task.exponential_backoff = true;
        self.task.max_backoff = max.map(str::to_string);
        self
    }

    pub fn timeout(mut self, d: &str) -> Self {
        self.task.timeout = Some(d.to_string());
        self
    }

    pub fn connection(mut self, id: &str) -> Self {
        self.task.connection = Some(id.to_string());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.task.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.task.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn transient_exit_codes(mut self, codes: &[i32]) -> Self {
        self.task.transient_exit_codes = Some(codes.to_vec());
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}
