// src/exec/sql.rs

//! SQL-statement operator and the warehouse connection seam.
//!
//! The only bundled [`SqlConnection`] is [`PgConnection`], which speaks the
//! Postgres protocol. Warehouses with their own dialect or wire protocol
//! (Snowflake `COPY INTO ... FROM @STAGE`) need their own implementation.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::context::{RunContext, Template};
use crate::dag::task::{Task, TaskId};
use crate::errors::{IngestError, Result};
use crate::exec::operator::{
    ExternalOperator, OperatorError, OperatorFuture, OperatorOutput, OperatorResult,
};
use crate::exec::task_runner::within;
use crate::types::{ErrorClass, OperatorKind};

/// Future returned by [`SqlConnection::execute`].
pub type StatementFuture<'a> =
    Pin<Box<dyn Future<Output = std::result::Result<u64, OperatorError>> + Send + 'a>>;

/// A named warehouse connection.
///
/// Implementations are shared by every concurrently running SQL task that
/// names the connection, so checkout/release must be safe under concurrency
/// (a pool).
pub trait SqlConnection: Send + Sync {
    /// Execute `statement`, returning the number of rows affected.
    fn execute<'a>(&'a self, statement: &'a str) -> StatementFuture<'a>;
}

/// Postgres-protocol warehouse connection backed by an `sqlx` pool.
#[derive(Debug, Clone)]
pub struct PgConnection {
    id: String,
    pool: PgPool,
}

impl PgConnection {
    /// Create a lazily connecting pool; no connection is opened until the
    /// first statement runs.
    pub fn connect_lazy(
        id: impl Into<String>,
        url: &str,
        max_connections: u32,
        acquire_timeout: Option<Duration>,
    ) -> Result<Self> {
        let id = id.into();
        let mut opts = PgPoolOptions::new().max_connections(max_connections);
        if let Some(t) = acquire_timeout {
            opts = opts.acquire_timeout(t);
        }
        let pool = opts.connect_lazy(url).map_err(|e| {
            IngestError::ConfigError(format!("connection '{id}': invalid url: {e}"))
        })?;
        info!(connection = %id, max_connections, "warehouse pool configured");
        Ok(Self { id, pool })
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl SqlConnection for PgConnection {
    fn execute<'a>(&'a self, statement: &'a str) -> StatementFuture<'a> {
        Box::pin(async move {
            let result = sqlx::raw_sql(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    OperatorError::classified(classify_sqlx_error(&e), e.to_string(), String::new())
                })?;
            Ok(result.rows_affected())
        })
    }
}

/// Classify a driver error for the retry policy.
///
/// Connectivity problems (I/O, TLS, pool exhaustion) are transient; database
/// errors are classified by SQLSTATE (see [`classify_sqlstate`]); anything
/// else (decode errors, bad configuration) is permanent.
pub fn classify_sqlx_error(err: &sqlx::Error) -> ErrorClass {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => ErrorClass::Transient,
        sqlx::Error::Database(db) => classify_sqlstate(db.code().as_deref()),
        _ => ErrorClass::Permanent,
    }
}

/// Transient SQLSTATE classes: `08` connection exception, `40` transaction
/// rollback (serialization failure, deadlock), `53` insufficient resources,
/// `57P` operator intervention (admin shutdown, crash, cannot connect now).
pub fn classify_sqlstate(code: Option<&str>) -> ErrorClass {
    match code {
        Some(c)
            if c.starts_with("08")
                || c.starts_with("40")
                || c.starts_with("53")
                || c.starts_with("57P") =>
        {
            ErrorClass::Transient
        }
        _ => ErrorClass::Permanent,
    }
}

/// Runs one templated statement against a named connection.
///
/// The template is rendered to plain SQL text and sent as is: nothing is
/// bound as a parameter, and a connection may accept several
/// `;`-separated statements in one call.
#[derive(Clone)]
pub struct SqlStatementOperator {
    task: TaskId,
    connection_id: String,
    connection: Arc<dyn SqlConnection>,
    template: Template,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for SqlStatementOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlStatementOperator")
            .field("task", &self.task)
            .field("connection_id", &self.connection_id)
            .field("template", &self.template.source())
            .finish_non_exhaustive()
    }
}

impl SqlStatementOperator {
    pub fn new(
        task: impl Into<TaskId>,
        connection_id: impl Into<String>,
        connection: Arc<dyn SqlConnection>,
        template: Template,
    ) -> Self {
        Self {
            task: task.into(),
            connection_id: connection_id.into(),
            connection,
            template,
            timeout: None,
        }
    }

    pub fn from_task(
        task: &Task,
        template: &Template,
        connection_id: &str,
        connection: Arc<dyn SqlConnection>,
    ) -> Self {
        let mut op = Self::new(task.id.clone(), connection_id, connection, template.clone());
        op.timeout = task.timeout;
        op
    }

    async fn run(&self, ctx: &RunContext, cancel: CancellationToken) -> OperatorResult {
        let statement = self.template.render(ctx);
        info!(
            task = %self.task,
            date = %ctx.date(),
            connection = %self.connection_id,
            "executing statement"
        );
        debug!(task = %self.task, %statement, "statement text");

        let rows = tokio::select! {
            res = within(self.timeout, self.connection.execute(&statement)) => match res {
                Some(r) => r?,
                None => {
                    return Err(OperatorError::transient(format!(
                        "statement timed out after {:?}",
                        self.timeout.unwrap_or_default()
                    )));
                }
            },
            _ = cancel.cancelled() => {
                info!(task = %self.task, date = %ctx.date(), "cancellation requested; dropping statement");
                return Err(OperatorError::Cancelled { output: String::new() });
            }
        };

        info!(task = %self.task, date = %ctx.date(), rows, "statement completed");
        Ok(OperatorOutput {
            output: format!("{rows} row(s) affected"),
            rows_affected: Some(rows),
        })
    }
}

impl ExternalOperator for SqlStatementOperator {
    fn kind(&self) -> OperatorKind {
        OperatorKind::SqlStatement
    }

    fn describe(&self, ctx: &RunContext) -> String {
        self.template.render(ctx)
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a RunContext,
        cancel: CancellationToken,
    ) -> OperatorFuture<'a> {
        Box::pin(self.run(ctx, cancel))
    }
}
