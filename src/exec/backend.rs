// src/exec/backend.rs

//! Pluggable operator backend.
//!
//! The executor never constructs operators itself; it asks an
//! `OperatorBackend` for one per task. This makes it easy to swap in scripted
//! fakes in tests while keeping the production operators in
//! [`task_runner`](super::task_runner) and [`sql`](super::sql).
//!
//! - `DefaultOperatorBackend` selects the operator variant from the task's
//!   declared kind and resolves SQL connections through a
//!   [`ConnectionRegistry`].
//! - Tests provide their own backend that records dispatches and returns
//!   scripted outcomes.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::context::Template;
use crate::dag::DependencyGraph;
use crate::dag::task::{Task, TaskId};
use crate::errors::{IngestError, Result};
use crate::exec::connections::ConnectionRegistry;
use crate::exec::operator::ExternalOperator;
use crate::exec::sql::SqlStatementOperator;
use crate::exec::task_runner::ShellCommandOperator;
use crate::types::OperatorKind;

/// Builds the operator that executes a task.
pub trait OperatorBackend: Send + Sync {
    fn operator_for(&self, task: &Task, template: &Template) -> Result<Arc<dyn ExternalOperator>>;
}

/// Production backend: shell tasks become [`ShellCommandOperator`]s, SQL
/// tasks become [`SqlStatementOperator`]s bound to their named connection.
pub struct DefaultOperatorBackend {
    connections: Arc<dyn ConnectionRegistry>,
}

impl DefaultOperatorBackend {
    pub fn new(connections: Arc<dyn ConnectionRegistry>) -> Self {
        Self { connections }
    }
}

impl OperatorBackend for DefaultOperatorBackend {
    fn operator_for(&self, task: &Task, template: &Template) -> Result<Arc<dyn ExternalOperator>> {
        match task.kind {
            OperatorKind::ShellCommand => {
                Ok(Arc::new(ShellCommandOperator::from_task(task, template)))
            }
            OperatorKind::SqlStatement => {
                let conn_id = task.connection.as_deref().ok_or_else(|| {
                    IngestError::ConfigError(format!(
                        "task '{}' is an sql-statement task but has no connection",
                        task.id
                    ))
                })?;
                let conn = self.connections.lookup(conn_id).ok_or_else(|| {
                    IngestError::UnknownConnection {
                        task: task.id.clone(),
                        connection: conn_id.to_string(),
                    }
                })?;
                Ok(Arc::new(SqlStatementOperator::from_task(
                    task, template, conn_id, conn,
                )))
            }
        }
    }
}

/// The operators for every task of a graph, resolved up front so that an
/// unknown connection fails before any run instance exists.
#[derive(Clone)]
pub struct OperatorSet {
    by_task: HashMap<TaskId, Arc<dyn ExternalOperator>>,
}

impl OperatorSet {
    pub fn resolve(graph: &DependencyGraph, backend: &dyn OperatorBackend) -> Result<Self> {
        let mut by_task = HashMap::with_capacity(graph.len());
        for task in graph.tasks() {
            let template = graph.template_of(&task.id).ok_or_else(|| {
                IngestError::ConfigError(format!("task '{}' has no parsed template", task.id))
            })?;
            let op = backend.operator_for(task, template)?;
            debug!(task = %task.id, kind = %op.kind(), "resolved operator");
            by_task.insert(task.id.clone(), op);
        }
        Ok(Self { by_task })
    }

    pub fn get(&self, task: &str) -> Option<&Arc<dyn ExternalOperator>> {
        self.by_task.get(task)
    }
}
