// src/exec/task_runner.rs

//! Shell-command operator: runs one command line as a child process.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::{RunContext, Template};
use crate::dag::task::{Task, TaskId};
use crate::exec::operator::{
    ExternalOperator, OperatorError, OperatorFuture, OperatorOutput, OperatorResult, keep_tail,
};
use crate::types::{ErrorClass, OperatorKind};

/// Runs a templated command line through the platform shell.
///
/// Success is a zero exit status. Stdout and stderr are captured (stdout
/// first) and returned as the attempt's output.
///
/// Classification:
/// - spawn failures are permanent (the command or working dir is wrong),
/// - exit codes listed in `transient_exit_codes` are transient,
/// - termination by a signal and timeouts are transient,
/// - every other non-zero exit is permanent.
#[derive(Debug, Clone)]
pub struct ShellCommandOperator {
    task: TaskId,
    template: Template,
    working_dir: Option<PathBuf>,
    env: BTreeMap<String, String>,
    timeout: Option<Duration>,
    transient_exit_codes: Vec<i32>,
}

impl ShellCommandOperator {
    pub fn new(task: impl Into<TaskId>, template: Template) -> Self {
        Self {
            task: task.into(),
            template,
            working_dir: None,
            env: BTreeMap::new(),
            timeout: None,
            transient_exit_codes: vec![75],
        }
    }

    pub fn from_task(task: &Task, template: &Template) -> Self {
        Self {
            task: task.id.clone(),
            template: template.clone(),
            working_dir: task.working_dir.clone(),
            env: task.env.clone(),
            timeout: task.timeout,
            transient_exit_codes: task.transient_exit_codes.clone(),
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_transient_exit_codes(mut self, codes: Vec<i32>) -> Self {
        self.transient_exit_codes = codes;
        self
    }

    fn build_command(&self, ctx: &RunContext, line: &str) -> Command {
        // Build a shell command appropriate for the platform.
        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(line);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(line);
            c
        };

        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }
        cmd.envs(&self.env)
            .env("INGESTDAG_PIPELINE", ctx.pipeline_id())
            .env("INGESTDAG_DS", ctx.ds())
            .env("INGESTDAG_RUN_ID", ctx.run_id())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn run(&self, ctx: &RunContext, cancel: CancellationToken) -> OperatorResult {
        let line = self.template.render(ctx);
        info!(
            task = %self.task,
            date = %ctx.date(),
            cmd = %line,
            "starting task process"
        );

        let child = self.build_command(ctx, &line).spawn().map_err(|e| {
            OperatorError::permanent(format!(
                "spawning process for task '{}': {e}",
                self.task
            ))
        })?;

        // Either the process exits on its own (normal case), or the run is
        // aborted. Dropping the wait future drops the child, and
        // `kill_on_drop(true)` kills it.
        let waited = tokio::select! {
            res = within(self.timeout, child.wait_with_output()) => res,
            _ = cancel.cancelled() => {
                info!(
                    task = %self.task,
                    date = %ctx.date(),
                    "cancellation requested for running task; killing process"
                );
                return Err(OperatorError::Cancelled { output: String::new() });
            }
        };

        let out = match waited {
            None => {
                warn!(task = %self.task, timeout = ?self.timeout, "task process timed out; killed");
                return Err(OperatorError::transient(format!(
                    "timed out after {:?}",
                    self.timeout.unwrap_or_default()
                )));
            }
            Some(Err(e)) => {
                return Err(OperatorError::transient(format!(
                    "waiting for process of task '{}': {e}",
                    self.task
                )));
            }
            Some(Ok(out)) => out,
        };

        let mut combined = String::from_utf8_lossy(&out.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&out.stderr));
        for line in combined.lines() {
            debug!(task = %self.task, "output: {}", line);
        }
        let combined = keep_tail(combined);

        let code = out.status.code();
        info!(
            task = %self.task,
            date = %ctx.date(),
            exit_code = code.unwrap_or(-1),
            success = out.status.success(),
            "task process exited"
        );

        if out.status.success() {
            return Ok(OperatorOutput {
                output: combined,
                rows_affected: None,
            });
        }

        let (class, message) = match code {
            Some(c) if self.transient_exit_codes.contains(&c) => {
                (ErrorClass::Transient, format!("exited with status {c}"))
            }
            Some(c) => (ErrorClass::Permanent, format!("exited with status {c}")),
            None => (ErrorClass::Transient, "terminated by signal".to_string()),
        };
        Err(OperatorError::classified(class, message, combined))
    }
}

impl ExternalOperator for ShellCommandOperator {
    fn kind(&self) -> OperatorKind {
        OperatorKind::ShellCommand
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

/// Await `fut`, giving up after `limit` if one is set.
pub(crate) async fn within<F: Future>(limit: Option<Duration>, fut: F) -> Option<F::Output> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await.ok(),
        None => Some(fut.await),
    }
}
