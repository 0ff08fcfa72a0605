// src/engine/mod.rs

//! Execution engine for ingestdag.
//!
//! This module ties together:
//! - the per-date scheduler ([`crate::dag::DateScheduler`], pure)
//! - the async driver that runs one DAG run on a tokio runtime ([`runtime`])
//! - the executor that fans a trigger out over several dates ([`executor`])
//! - the run store that keeps the latest status of every run ([`store`])
//! - the trigger interface ([`orchestrator`])
//!
//! The pure state machine lives in [`crate::dag`]; everything here is the
//! async/IO shell around it.

use crate::exec::{OperatorError, OperatorResult};
use crate::types::ErrorClass;

/// Outcome of one operator attempt, as the scheduler sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success {
        output: String,
    },
    Failed {
        class: ErrorClass,
        message: String,
        output: String,
    },
}

impl AttemptOutcome {
    pub fn success(output: impl Into<String>) -> Self {
        AttemptOutcome::Success {
            output: output.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        AttemptOutcome::Failed {
            class: ErrorClass::Transient,
            message: message.into(),
            output: String::new(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        AttemptOutcome::Failed {
            class: ErrorClass::Permanent,
            message: message.into(),
            output: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Success { .. })
    }
}

impl From<OperatorResult> for AttemptOutcome {
    fn from(result: OperatorResult) -> Self {
        match result {
            Ok(out) => AttemptOutcome::Success { output: out.output },
            Err(err) => {
                let class = err.class();
                let message = err.to_string();
                let output = match err {
                    OperatorError::Transient { output, .. }
                    | OperatorError::Permanent { output, .. }
                    | OperatorError::Cancelled { output } => output,
                };
                AttemptOutcome::Failed {
                    class,
                    message,
                    output,
                }
            }
        }
    }
}

/// Limits for one trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Operator invocations in flight at once, across all dates.
    pub concurrency_limit: usize,
    /// DAG runs (dates) active at once.
    pub max_active_runs: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            concurrency_limit: 4,
            max_active_runs: 1,
        }
    }
}

impl RunOptions {
    pub fn new(concurrency_limit: usize, max_active_runs: usize) -> Self {
        Self {
            concurrency_limit: concurrency_limit.max(1),
            max_active_runs: max_active_runs.max(1),
        }
    }
}

pub mod executor;
pub mod orchestrator;
pub mod runtime;
pub mod store;

pub use executor::Executor;
pub use orchestrator::Orchestrator;
pub use runtime::DagRunDriver;
pub use store::RunStore;
