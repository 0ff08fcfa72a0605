// src/dag/task_info.rs

//! Per-date run state of tasks.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};

use crate::dag::task::TaskId;
use crate::types::ErrorClass;

/// State of one task for one logical date.
///
/// `Success`, `Failed`, `UpstreamFailed` and `Skipped` are terminal: once an
/// instance reaches one of them it never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    /// Waiting on upstream instances.
    Pending,
    /// Every upstream succeeded; waiting for a worker.
    Ready,
    /// An operator attempt is in flight.
    Running,
    /// A transient failure occurred; waiting for the backoff to elapse.
    Retrying,
    Success,
    /// Permanent failure, or transient failures exhausted the retry limit.
    Failed,
    /// Never dispatched because an upstream instance did not succeed.
    UpstreamFailed,
    /// Never dispatched because the run was aborted.
    Skipped,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Success | RunState::Failed | RunState::UpstreamFailed | RunState::Skipped
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Pending => "pending",
            RunState::Ready => "ready",
            RunState::Running => "running",
            RunState::Retrying => "retrying",
            RunState::Success => "success",
            RunState::Failed => "failed",
            RunState::UpstreamFailed => "upstream_failed",
            RunState::Skipped => "skipped",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The last error observed for an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    pub class: ErrorClass,
    pub message: String,
}

/// Execution record of one task for one date.
#[derive(Debug, Clone)]
pub struct RunInstance {
    pub task: TaskId,
    pub date: NaiveDate,
    pub state: RunState,
    /// Number of operator attempts started so far.
    pub attempts: u32,
    pub last_error: Option<LastError>,
    /// Output captured from the most recent attempt.
    pub output: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunInstance {
    pub fn new(task: TaskId, date: NaiveDate) -> Self {
        Self {
            task,
            date,
            state: RunState::Pending,
            attempts: 0,
            last_error: None,
            output: String::new(),
            started_at: None,
            finished_at: None,
        }
    }
}

/// An attempt the scheduler wants the executor to start now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledAttempt {
    pub task: TaskId,
    pub date: NaiveDate,
    /// 1-based attempt number.
    pub attempt: u32,
}
