// src/errors.rs

//! Crate-wide error types.
//!
//! [`IngestError`] covers everything that can go wrong *before* a run starts
//! (config, graph construction, templates) plus the plumbing errors of the
//! trigger interface. Failures of individual task attempts are not errors at
//! this level; they are recorded on the run instance (see
//! [`crate::exec::OperatorError`]).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("task '{task}' has unknown upstream '{upstream}'")]
    UnknownUpstream { task: String, upstream: String },

    #[error("task '{task}' references unknown connection '{connection}'")]
    UnknownConnection { task: String, connection: String },

    #[error("Cycle detected in DAG: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("template error in task '{task}': {message}")]
    Template { task: String, message: String },

    #[error("unknown pipeline: {0}")]
    UnknownPipeline(String),

    #[error("pipeline '{pipeline}' already has an active run for {date}")]
    RunInProgress { pipeline: String, date: chrono::NaiveDate },

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IngestError {
    /// Whether this error was raised while validating configuration or
    /// building the graph, i.e. before any run instance could exist.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            IngestError::ConfigError(_)
                | IngestError::UnknownUpstream { .. }
                | IngestError::UnknownConnection { .. }
                | IngestError::Cycle { .. }
                | IngestError::Template { .. }
                | IngestError::TomlError(_)
        )
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, IngestError>;
