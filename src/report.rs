// src/report.rs

//! DAG run summaries returned by the trigger interface.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};

use crate::dag::task::TaskId;
use crate::dag::task_info::{RunInstance, RunState};
use crate::types::ErrorClass;

/// Overall status of one DAG run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DagRunStatus {
    /// At least one instance is not terminal yet.
    Running,
    /// Every instance succeeded.
    Success,
    /// At least one instance is `failed` or `upstream_failed`.
    Failed,
    /// The run was aborted; nothing failed, but some instances were skipped.
    Aborted,
}

impl DagRunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DagRunStatus::Running => "running",
            DagRunStatus::Success => "success",
            DagRunStatus::Failed => "failed",
            DagRunStatus::Aborted => "aborted",
        }
    }
}

impl fmt::Display for DagRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-task line of a [`DagRunSummary`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRunSummary {
    pub task: TaskId,
    pub state: RunState,
    pub attempts: u32,
    pub error_class: Option<ErrorClass>,
    pub error: Option<String>,
    pub output: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<RunInstance> for TaskRunSummary {
    fn from(inst: RunInstance) -> Self {
        let (error_class, error) = match inst.last_error {
            Some(e) => (Some(e.class), Some(e.message)),
            None => (None, None),
        };
        Self {
            task: inst.task,
            state: inst.state,
            attempts: inst.attempts,
            error_class,
            error,
            output: inst.output,
            started_at: inst.started_at,
            finished_at: inst.finished_at,
        }
    }
}

/// Snapshot of one DAG run. Tasks are listed in topological order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DagRunSummary {
    pub pipeline_id: String,
    pub run_id: String,
    pub date: NaiveDate,
    pub status: DagRunStatus,
    pub tasks: Vec<TaskRunSummary>,
    /// The run terminated because no progress was possible.
    pub stalled: bool,
    pub aborted: bool,
}

impl DagRunSummary {
    pub fn from_instances(
        pipeline_id: &str,
        run_id: &str,
        date: NaiveDate,
        instances: Vec<RunInstance>,
        stalled: bool,
        aborted: bool,
    ) -> Self {
        let tasks: Vec<TaskRunSummary> = instances.into_iter().map(Into::into).collect();
        let status = status_of(&tasks, stalled);
        Self {
            pipeline_id: pipeline_id.to_string(),
            run_id: run_id.to_string(),
            date,
            status,
            tasks,
            stalled,
            aborted,
        }
    }

    pub fn task(&self, id: &str) -> Option<&TaskRunSummary> {
        self.tasks.iter().find(|t| t.task == id)
    }

    pub fn state_of(&self, id: &str) -> Option<RunState> {
        self.task(id).map(|t| t.state)
    }

    pub fn is_success(&self) -> bool {
        self.status == DagRunStatus::Success
    }

    pub fn is_terminal(&self) -> bool {
        self.status != DagRunStatus::Running
    }

    pub fn count(&self, state: RunState) -> usize {
        self.tasks.iter().filter(|t| t.state == state).count()
    }
}

fn status_of(tasks: &[TaskRunSummary], stalled: bool) -> DagRunStatus {
    if tasks.iter().any(|t| !t.state.is_terminal()) {
        return DagRunStatus::Running;
    }
    if stalled
        || tasks
            .iter()
            .any(|t| matches!(t.state, RunState::Failed | RunState::UpstreamFailed))
    {
        return DagRunStatus::Failed;
    }
    if tasks.iter().all(|t| t.state == RunState::Success) {
        DagRunStatus::Success
    } else {
        DagRunStatus::Aborted
    }
}

impl fmt::Display for DagRunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} {} ({}): {}",
            self.pipeline_id, self.date, self.run_id, self.status
        )?;
        let width = self.tasks.iter().map(|t| t.task.len()).max().unwrap_or(0);
        for t in &self.tasks {
            write!(
                f,
                "  {:<width$}  {:<15}  attempts={}",
                t.task,
                t.state.as_str(),
                t.attempts,
                width = width
            )?;
            if let (Some(class), Some(err)) = (t.error_class, t.error.as_deref()) {
                write!(f, "  [{class}] {err}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
