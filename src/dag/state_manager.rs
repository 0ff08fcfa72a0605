// src/dag/state_manager.rs

//! Per-date state transitions for run instances.

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::{debug, warn};

use crate::dag::DependencyGraph;
use crate::dag::task::TaskId;
use crate::dag::task_info::{RunInstance, RunState};

/// Mutating view over the run instances of one date.
pub struct StateManager<'a> {
    graph: &'a DependencyGraph,
    instances: &'a mut BTreeMap<TaskId, RunInstance>,
}

impl<'a> StateManager<'a> {
    pub fn new(
        graph: &'a DependencyGraph,
        instances: &'a mut BTreeMap<TaskId, RunInstance>,
    ) -> Self {
        Self { graph, instances }
    }

    /// Move every `Pending` instance whose upstream instances all succeeded
    /// to `Ready`. Returns the promoted task ids in topological order.
    pub fn promote_ready(&mut self) -> Vec<TaskId> {
        // Decide first, then mutate to avoid borrowing issues.
        let candidates: Vec<TaskId> = {
            let ro = ReadOnlyStateManager::new(self.graph, self.instances);
            self.graph
                .topological_order()
                .iter()
                .filter(|id| {
                    ro.state_of(id) == Some(RunState::Pending) && ro.upstream_satisfied(id)
                })
                .cloned()
                .collect()
        };

        for id in &candidates {
            if let Some(inst) = self.instances.get_mut(id) {
                inst.state = RunState::Ready;
                debug!(task = %id, date = %inst.date, "upstream satisfied; marked Ready");
            }
        }

        candidates
    }

    /// Mark every non-terminal transitive dependent of `failed_task` as
    /// `UpstreamFailed`.
    ///
    /// Returns the newly marked tasks (excluding `failed_task` itself).
    pub fn mark_dependents_upstream_failed(&mut self, failed_task: &str) -> Vec<TaskId> {
        let mut newly_failed = Vec::new();

        for name in self.graph.transitive_downstream_of(failed_task) {
            let Some(inst) = self.instances.get_mut(&name) else {
                warn!(task = %name, "node in graph not present in run instances");
                continue;
            };
            match inst.state {
                RunState::Pending | RunState::Ready => {
                    inst.state = RunState::UpstreamFailed;
                    inst.finished_at = Some(Utc::now());
                    debug!(
                        task = %name,
                        upstream = %failed_task,
                        date = %inst.date,
                        "marking dependent as UpstreamFailed"
                    );
                    newly_failed.push(name);
                }
                RunState::Running | RunState::Retrying => {
                    // Cannot happen while the upstream is not a success.
                    warn!(
                        task = %name,
                        state = %inst.state,
                        upstream = %failed_task,
                        "dependent of failed task is already in flight"
                    );
                }
                RunState::Success
                | RunState::Failed
                | RunState::UpstreamFailed
                | RunState::Skipped => {}
            }
        }

        newly_failed
    }

    /// Mark every instance that has not started an attempt and is not
    /// terminal as `Skipped`. `Running` instances are left alone.
    pub fn mark_unstarted_skipped(&mut self) -> Vec<TaskId> {
        let mut skipped = Vec::new();
        for id in self.graph.topological_order() {
            if let Some(inst) = self.instances.get_mut(id) {
                if matches!(
                    inst.state,
                    RunState::Pending | RunState::Ready | RunState::Retrying
                ) {
                    inst.state = RunState::Skipped;
                    inst.finished_at = Some(Utc::now());
                    skipped.push(id.clone());
                }
            }
        }
        skipped
    }

    /// Mark every remaining `Pending` instance as `UpstreamFailed`.
    ///
    /// Used when a run can make no further progress.
    pub fn fail_stalled(&mut self) -> Vec<TaskId> {
        let mut failed = Vec::new();
        for id in self.graph.topological_order() {
            if let Some(inst) = self.instances.get_mut(id) {
                if inst.state == RunState::Pending {
                    inst.state = RunState::UpstreamFailed;
                    inst.finished_at = Some(Utc::now());
                    failed.push(id.clone());
                }
            }
        }
        failed
    }
}

/// A read-only view over the run instances of one date.
pub struct ReadOnlyStateManager<'a> {
    graph: &'a DependencyGraph,
    instances: &'a BTreeMap<TaskId, RunInstance>,
}

impl<'a> ReadOnlyStateManager<'a> {
    pub fn new(graph: &'a DependencyGraph, instances: &'a BTreeMap<TaskId, RunInstance>) -> Self {
        Self { graph, instances }
    }

    pub fn state_of(&self, task: &str) -> Option<RunState> {
        self.instances.get(task).map(|i| i.state)
    }

    /// Whether every upstream instance of `task` for this date succeeded.
    pub fn upstream_satisfied(&self, task: &str) -> bool {
        self.graph.upstream_of(task).iter().all(|up| match self.instances.get(up) {
            Some(inst) => inst.state == RunState::Success,
            None => {
                warn!(task = %task, upstream = %up, "upstream missing from run instances");
                false
            }
        })
    }

    /// First `Ready` instance in topological order.
    pub fn next_ready(&self) -> Option<TaskId> {
        self.graph
            .topological_order()
            .iter()
            .find(|id| self.state_of(id) == Some(RunState::Ready))
            .cloned()
    }

    pub fn count_in(&self, state: RunState) -> usize {
        self.instances.values().filter(|i| i.state == state).count()
    }

    pub fn all_terminal(&self) -> bool {
        self.instances.values().all(|i| i.state.is_terminal())
    }
}
