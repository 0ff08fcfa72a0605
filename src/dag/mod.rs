// src/dag/mod.rs

//! DAG representation and scheduling.
//!
//! - [`task`] defines a task and its retry policy.
//! - [`graph`] holds the validated, immutable dependency graph.
//! - [`scheduler`] contains the per-date state machine that decides
//!   which tasks are ready to run, and when dependents can be scheduled.
//! - [`task_info`] provides run-instance state and scheduled attempt types.
//! - [`scheduler_step`] defines the result type for scheduler steps.
//! - [`state_manager`] manages per-date state transitions.

pub mod graph;
pub mod scheduler;
pub mod scheduler_step;
pub mod state_manager;
pub mod task;
pub mod task_info;

pub use graph::DependencyGraph;
pub use scheduler::DateScheduler;
pub use scheduler_step::{RetryRequest, SchedulerStep};
pub use task::{RetryPolicy, Task, TaskId};
pub use task_info::{LastError, RunInstance, RunState, ScheduledAttempt};
