// src/dag/scheduler_step.rs

//! Step-by-step result types for the scheduler.

use std::time::Duration;

use crate::dag::task::TaskId;

/// A retry the executor must arm: after `delay`, call
/// `DateScheduler::step_backoff_elapsed(task)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryRequest {
    pub task: TaskId,
    /// Attempt number the retry will have (1-based).
    pub next_attempt: u32,
    pub delay: Duration,
}

/// Structured result of a single scheduler "step".
///
/// Tests can step a [`crate::dag::DateScheduler`] by hand and make
/// assertions about what changed.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// Tasks that became ready to dispatch as a result of this step.
    pub newly_ready: Vec<TaskId>,
    /// Tasks newly marked as failed or upstream-failed (the failing task
    /// first, then its dependents in topological order).
    pub newly_failed: Vec<TaskId>,
    /// Tasks newly marked as skipped.
    pub newly_skipped: Vec<TaskId>,
    /// Set when the completed attempt must be retried.
    pub retry: Option<RetryRequest>,
    /// Whether this step made every instance of the run terminal.
    pub run_just_finished: bool,
}
