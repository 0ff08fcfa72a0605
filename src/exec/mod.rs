// src/exec/mod.rs

//! Operator execution layer.
//!
//! This module is responsible for actually running the work a task
//! describes, for one run context at a time.
//!
//! - [`operator`] defines the `ExternalOperator` capability and the
//!   transient/permanent error classification.
//! - [`task_runner`] runs shell commands as child processes.
//! - [`sql`] runs statements against a warehouse connection.
//! - [`connections`] resolves connection ids to shared pools.
//! - [`backend`] provides the `OperatorBackend` trait and the production
//!   `DefaultOperatorBackend`, which tests replace with a scripted fake.

pub mod backend;
pub mod connections;
pub mod operator;
pub mod sql;
pub mod task_runner;

pub use backend::{DefaultOperatorBackend, OperatorBackend, OperatorSet};
pub use connections::{ConnectionRegistry, Connections};
pub use operator::{
    ExternalOperator, OperatorError, OperatorFuture, OperatorOutput, OperatorResult,
};
pub use sql::{PgConnection, SqlConnection, SqlStatementOperator, StatementFuture};
pub use task_runner::ShellCommandOperator;
