// src/exec/operator.rs

//! The operator capability: execute one unit of work for one run context.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::context::RunContext;
use crate::types::{ErrorClass, OperatorKind};

/// Largest amount of captured output kept per attempt (the tail is kept).
pub const MAX_CAPTURED_OUTPUT: usize = 64 * 1024;

/// Successful result of one operator invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperatorOutput {
    /// Captured output (combined stdout/stderr, or a statement summary).
    pub output: String,
    /// Rows affected, where the backend reports it.
    pub rows_affected: Option<u64>,
}

/// A failed operator invocation, classified for the retry policy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OperatorError {
    #[error("{message}")]
    Transient { message: String, output: String },

    #[error("{message}")]
    Permanent { message: String, output: String },

    #[error("cancelled")]
    Cancelled { output: String },
}

impl OperatorError {
    pub fn transient(message: impl Into<String>) -> Self {
        OperatorError::Transient {
            message: message.into(),
            output: String::new(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        OperatorError::Permanent {
            message: message.into(),
            output: String::new(),
        }
    }

    pub fn classified(class: ErrorClass, message: impl Into<String>, output: String) -> Self {
        match class {
            ErrorClass::Transient => OperatorError::Transient {
                message: message.into(),
                output,
            },
            ErrorClass::Permanent => OperatorError::Permanent {
                message: message.into(),
                output,
            },
            ErrorClass::Cancelled => OperatorError::Cancelled { output },
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            OperatorError::Transient { .. } => ErrorClass::Transient,
            OperatorError::Permanent { .. } => ErrorClass::Permanent,
            OperatorError::Cancelled { .. } => ErrorClass::Cancelled,
        }
    }

    pub fn output(&self) -> &str {
        match self {
            OperatorError::Transient { output, .. }
            | OperatorError::Permanent { output, .. }
            | OperatorError::Cancelled { output } => output,
        }
    }
}

pub type OperatorResult = Result<OperatorOutput, OperatorError>;

pub type OperatorFuture<'a> = Pin<Box<dyn Future<Output = OperatorResult> + Send + 'a>>;

/// One atomic unit of work.
///
/// Implementations must be idempotent per [`RunContext`]: invoking
/// `execute` twice with the same context must leave the external system as a
/// single successful invocation would (overwrite, merge, or a date-keyed
/// object name the loader deduplicates). The executor re-invokes with the
/// same context on every retry.
///
/// When `cancel` fires, the implementation should stop its work (kill the
/// child process, drop the query) and return [`OperatorError::Cancelled`].
pub trait ExternalOperator: Send + Sync {
    fn kind(&self) -> OperatorKind;

    /// The command line or statement this operator would run for `ctx`.
    fn describe(&self, ctx: &RunContext) -> String;

    fn execute<'a>(&'a self, ctx: &'a RunContext, cancel: CancellationToken)
    -> OperatorFuture<'a>;
}

/// Keep at most [`MAX_CAPTURED_OUTPUT`] bytes from the end of `s`.
pub(crate) fn keep_tail(mut s: String) -> String {
    if s.len() <= MAX_CAPTURED_OUTPUT {
        return s;
    }
    let mut cut = s.len() - MAX_CAPTURED_OUTPUT;
    while !s.is_char_boundary(cut) {
        cut += 1;
    }
    s.drain(..cut);
    s
}
