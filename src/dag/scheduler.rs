// src/dag/scheduler.rs

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::dag::graph::DependencyGraph;
use crate::dag::scheduler_step::{RetryRequest, SchedulerStep};
use crate::dag::state_manager::{ReadOnlyStateManager, StateManager};
use crate::dag::task::TaskId;
use crate::dag::task_info::{LastError, RunInstance, RunState, ScheduledAttempt};
use crate::engine::AttemptOutcome;
use crate::report::DagRunSummary;
use crate::types::ErrorClass;

/// Pure state machine for one DAG run (one logical date).
///
/// It is responsible for:
/// - holding one [`RunInstance`] per task of the graph
/// - deciding which instances are ready (every upstream succeeded)
/// - handing out attempts, at most one in flight per instance
/// - applying the retry policy to failed attempts
/// - failing the transitive dependents of a failed task
/// - skipping unstarted work when the run is aborted
///
/// It performs no IO and owns no tasks or timers; the executor drives it.
#[derive(Debug)]
pub struct DateScheduler {
    graph: Arc<DependencyGraph>,
    date: NaiveDate,
    instances: BTreeMap<TaskId, RunInstance>,
    aborted: bool,
    stalled: bool,
    finished: bool,
}

impl DateScheduler {
    /// Create one `Pending` instance per task for `date`.
    pub fn new(graph: Arc<DependencyGraph>, date: NaiveDate) -> Self {
        let instances = graph
            .topological_order()
            .iter()
            .map(|id| (id.clone(), RunInstance::new(id.clone(), date)))
            .collect();

        Self {
            graph,
            date,
            instances,
            aborted: false,
            stalled: false,
            finished: false,
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    pub fn state_of(&self, task: &str) -> Option<RunState> {
        self.instances.get(task).map(|i| i.state)
    }

    pub fn instance(&self, task: &str) -> Option<&RunInstance> {
        self.instances.get(task)
    }

    /// Instances in topological order.
    pub fn instances(&self) -> impl Iterator<Item = &RunInstance> {
        self.graph
            .topological_order()
            .iter()
            .filter_map(|id| self.instances.get(id))
    }

    pub fn has_ready(&self) -> bool {
        self.read_only().count_in(RunState::Ready) > 0
    }

    /// Number of instances with an attempt in flight.
    pub fn running(&self) -> usize {
        self.read_only().count_in(RunState::Running)
    }

    /// Whether every upstream instance of `task` has succeeded.
    ///
    /// Returns `None` if the task is unknown.
    pub fn upstream_satisfied(&self, task: &str) -> Option<bool> {
        self.instances.get(task)?;
        Some(self.read_only().upstream_satisfied(task))
    }

    /// Compute the initial ready set.
    pub fn start(&mut self) -> SchedulerStep {
        debug!(date = %self.date, tasks = self.instances.len(), "scheduler: starting DAG run");
        let newly_ready = self.manager().promote_ready();
        let run_just_finished = self.maybe_finish_run();
        SchedulerStep {
            newly_ready,
            run_just_finished,
            ..SchedulerStep::default()
        }
    }

    /// Take the next ready instance (topological order), mark it `Running`
    /// and return the attempt to start.
    pub fn dispatch_next(&mut self) -> Option<ScheduledAttempt> {
        if self.aborted {
            return None;
        }
        let id = self.read_only().next_ready()?;
        let inst = self.instances.get_mut(&id)?;

        inst.state = RunState::Running;
        inst.attempts += 1;
        if inst.started_at.is_none() {
            inst.started_at = Some(Utc::now());
        }

        if inst.attempts == 1 {
            info!(task = %id, date = %self.date, "dispatching task");
        } else {
            info!(task = %id, date = %self.date, attempt = inst.attempts, "dispatching retry");
        }

        Some(ScheduledAttempt {
            task: id,
            date: self.date,
            attempt: inst.attempts,
        })
    }

    /// Record the outcome of an in-flight attempt.
    pub fn step_completion(&mut self, task: &str, outcome: AttemptOutcome) -> SchedulerStep {
        let mut step = SchedulerStep::default();
        let aborted = self.aborted;
        let date = self.date;
        let retry_policy = match self.graph.task(task) {
            Some(t) => t.retry.clone(),
            None => {
                warn!(task = %task, "completion for unknown task; ignoring");
                return step;
            }
        };

        let Some(inst) = self.instances.get_mut(task) else {
            return step;
        };
        if inst.state != RunState::Running {
            warn!(
                task = %task,
                state = %inst.state,
                "completion for task that is not running; ignoring"
            );
            return step;
        }

        match outcome {
            AttemptOutcome::Success { output } => {
                inst.state = RunState::Success;
                inst.output = output;
                inst.finished_at = Some(Utc::now());
                info!(task = %task, %date, attempts = inst.attempts, "task succeeded");
                if !aborted {
                    step.newly_ready = self.manager().promote_ready();
                }
            }
            AttemptOutcome::Failed {
                class,
                message,
                output,
            } => {
                inst.output = output;
                inst.last_error = Some(LastError {
                    class,
                    message: message.clone(),
                });

                let retryable = class == ErrorClass::Transient && !aborted;
                if retryable && retry_policy.allows_retry(inst.attempts) {
                    let delay = retry_policy.delay_after(inst.attempts);
                    inst.state = RunState::Retrying;
                    warn!(
                        task = %task,
                        %date,
                        attempt = inst.attempts,
                        max_attempts = retry_policy.max_attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "transient failure; scheduling retry"
                    );
                    step.retry = Some(RetryRequest {
                        task: task.to_string(),
                        next_attempt: inst.attempts + 1,
                        delay,
                    });
                } else {
                    inst.state = RunState::Failed;
                    inst.finished_at = Some(Utc::now());
                    warn!(
                        task = %task,
                        %date,
                        attempts = inst.attempts,
                        class = %class,
                        error = %message,
                        "task failed; failing dependents in this run"
                    );
                    step.newly_failed.push(task.to_string());
                    let mut dependents = self.manager().mark_dependents_upstream_failed(task);
                    step.newly_failed.append(&mut dependents);
                }
            }
        }

        step.run_just_finished = self.maybe_finish_run();
        step
    }

    /// A retry backoff elapsed: the instance becomes ready again.
    pub fn step_backoff_elapsed(&mut self, task: &str) -> SchedulerStep {
        let mut step = SchedulerStep::default();
        match self.instances.get_mut(task) {
            Some(inst) if inst.state == RunState::Retrying => {
                inst.state = RunState::Ready;
                debug!(task = %task, date = %self.date, "backoff elapsed; marked Ready");
                step.newly_ready.push(task.to_string());
            }
            Some(inst) => {
                debug!(task = %task, state = %inst.state, "backoff elapsed for non-retrying task; ignoring");
            }
            None => warn!(task = %task, "backoff elapsed for unknown task; ignoring"),
        }
        step.run_just_finished = self.maybe_finish_run();
        step
    }

    /// Abort the run: stop handing out attempts and skip everything that has
    /// not started. In-flight attempts still report completion.
    pub fn step_abort(&mut self) -> SchedulerStep {
        if self.aborted {
            return SchedulerStep::default();
        }
        self.aborted = true;
        let newly_skipped = self.manager().mark_unstarted_skipped();
        info!(
            date = %self.date,
            skipped = newly_skipped.len(),
            in_flight = self.running(),
            "DAG run aborted"
        );
        let run_just_finished = self.maybe_finish_run();
        SchedulerStep {
            newly_skipped,
            run_just_finished,
            ..SchedulerStep::default()
        }
    }

    /// Detect a run that cannot make progress: nothing ready, in flight or
    /// waiting on a backoff, yet not every instance is terminal.
    ///
    /// Cannot happen for an acyclic graph; if it does, the remaining
    /// instances are failed so the run terminates.
    pub fn check_stalled(&mut self) -> SchedulerStep {
        let ro = self.read_only();
        let stuck = !ro.all_terminal()
            && ro.count_in(RunState::Ready) == 0
            && ro.count_in(RunState::Running) == 0
            && ro.count_in(RunState::Retrying) == 0;
        if !stuck {
            return SchedulerStep::default();
        }

        self.stalled = true;
        let newly_failed = self.manager().fail_stalled();
        warn!(date = %self.date, ?newly_failed, "DAG run stalled; failing remaining tasks");
        let run_just_finished = self.maybe_finish_run();
        SchedulerStep {
            newly_failed,
            run_just_finished,
            ..SchedulerStep::default()
        }
    }

    /// Snapshot of the run for reporting.
    pub fn summary(&self, pipeline_id: &str, run_id: &str) -> DagRunSummary {
        DagRunSummary::from_instances(
            pipeline_id,
            run_id,
            self.date,
            self.instances().cloned().collect(),
            self.stalled,
            self.aborted,
        )
    }

    fn manager(&mut self) -> StateManager<'_> {
        StateManager::new(&self.graph, &mut self.instances)
    }

    fn read_only(&self) -> ReadOnlyStateManager<'_> {
        ReadOnlyStateManager::new(&self.graph, &self.instances)
    }

    /// Returns `true` if this call transitioned the run to finished.
    fn maybe_finish_run(&mut self) -> bool {
        if self.finished || !self.read_only().all_terminal() {
            return false;
        }
        self.finished = true;
        info!(date = %self.date, "scheduler: all tasks terminal; DAG run finished");
        true
    }
}
