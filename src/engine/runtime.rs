// src/engine/runtime.rs

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{Id, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::RunContext;
use crate::dag::task::TaskId;
use crate::dag::{DateScheduler, RunState, SchedulerStep};
use crate::engine::AttemptOutcome;
use crate::engine::store::RunStore;
use crate::exec::{OperatorResult, OperatorSet};
use crate::report::DagRunSummary;

/// Completion events of the futures a driver has in flight.
#[derive(Debug)]
enum WorkerEvent {
    AttemptFinished {
        task: TaskId,
        attempt: u32,
        result: OperatorResult,
    },
    BackoffElapsed {
        task: TaskId,
    },
}

/// Drives one DAG run (one date) to completion.
///
/// This is the async IO shell around [`DateScheduler`], which contains all
/// the run semantics. The driver:
/// - acquires a worker permit for every attempt it dispatches,
/// - spawns operator attempts and backoff timers onto a `JoinSet`,
/// - feeds their completions back into the scheduler,
/// - publishes a fresh summary to the [`RunStore`] after every step.
///
/// Permits are only held while an attempt is in flight; a task waiting on
/// its retry backoff holds none.
pub struct DagRunDriver {
    scheduler: DateScheduler,
    ctx: Arc<RunContext>,
    operators: OperatorSet,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    store: Arc<RunStore>,
    workers: JoinSet<WorkerEvent>,
    in_flight: HashMap<Id, TaskId>,
}

impl fmt::Debug for DagRunDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DagRunDriver")
            .field("scheduler", &self.scheduler)
            .field("ctx", &self.ctx)
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

impl DagRunDriver {
    pub fn new(
        scheduler: DateScheduler,
        ctx: RunContext,
        operators: OperatorSet,
        permits: Arc<Semaphore>,
        cancel: CancellationToken,
        store: Arc<RunStore>,
    ) -> Self {
        Self {
            scheduler,
            ctx: Arc::new(ctx),
            operators,
            permits,
            cancel,
            store,
            workers: JoinSet::new(),
            in_flight: HashMap::new(),
        }
    }

    /// Snapshot of the run in its current state.
    pub fn summary(&self) -> DagRunSummary {
        self.scheduler
            .summary(self.ctx.pipeline_id(), &self.ctx.run_id())
    }

    /// Main loop.
    ///
    /// - Dispatches every ready instance a permit is available for.
    /// - Waits for the next of: abort, a worker event, a free permit.
    /// - Stops once every instance is terminal.
    pub async fn run(mut self) -> DagRunSummary {
        info!(
            pipeline = %self.ctx.pipeline_id(),
            date = %self.ctx.date(),
            run_id = %self.ctx.run_id(),
            "DAG run started"
        );

        let step = self.scheduler.start();
        self.apply(step);

        loop {
            if self.cancel.is_cancelled() && !self.scheduler.is_aborted() {
                let step = self.scheduler.step_abort();
                self.apply(step);
            }

            self.dispatch_available();

            if self.scheduler.is_finished() {
                break;
            }

            if self.workers.is_empty() && !self.scheduler.has_ready() {
                let step = self.scheduler.check_stalled();
                self.apply(step);
                if self.scheduler.is_finished() {
                    break;
                }
                error!(date = %self.ctx.date(), "driver has nothing to wait on; giving up on run");
                break;
            }

            let watch_cancel = !self.scheduler.is_aborted();
            let wants_permit = self.scheduler.has_ready();

            tokio::select! {
                biased;

                _ = self.cancel.cancelled(), if watch_cancel => {
                    let step = self.scheduler.step_abort();
                    self.apply(step);
                }

                Some(joined) = self.workers.join_next_with_id() => {
                    match joined {
                        Ok((id, event)) => {
                            self.in_flight.remove(&id);
                            self.handle_event(event);
                        }
                        Err(err) => {
                            let task = self.in_flight.remove(&err.id());
                            self.handle_join_error(task, err);
                        }
                    }
                }

                permit = Arc::clone(&self.permits).acquire_owned(), if wants_permit => {
                    match permit {
                        Ok(permit) => self.dispatch_one(permit),
                        Err(_) => {
                            error!("worker semaphore closed; aborting run");
                            let step = self.scheduler.step_abort();
                            self.apply(step);
                        }
                    }
                }

                else => {
                    warn!(date = %self.ctx.date(), "nothing left to wait on");
                    break;
                }
            }
        }

        // Backoff timers of instances skipped by an abort may still be armed.
        self.workers.abort_all();

        let summary = self.summary();
        self.store.publish(summary.clone());
        info!(
            pipeline = %summary.pipeline_id,
            date = %summary.date,
            status = %summary.status,
            "DAG run finished"
        );
        summary
    }

    /// Dispatch ready instances for as long as permits are free.
    fn dispatch_available(&mut self) {
        while self.scheduler.has_ready() {
            match Arc::clone(&self.permits).try_acquire_owned() {
                Ok(permit) => self.dispatch_one(permit),
                Err(_) => break,
            }
        }
    }

    fn dispatch_one(&mut self, permit: OwnedSemaphorePermit) {
        let Some(attempt) = self.scheduler.dispatch_next() else {
            return;
        };

        let Some(op) = self.operators.get(&attempt.task).cloned() else {
            let step = self.scheduler.step_completion(
                &attempt.task,
                AttemptOutcome::permanent("no operator resolved for task"),
            );
            self.apply(step);
            return;
        };

        debug!(
            task = %attempt.task,
            date = %attempt.date,
            attempt = attempt.attempt,
            cmd = %op.describe(&self.ctx),
            "spawning attempt"
        );

        let ctx = Arc::clone(&self.ctx);
        let cancel = self.cancel.clone();
        let task = attempt.task.clone();
        let number = attempt.attempt;
        let handle = self.workers.spawn(async move {
            let _permit = permit;
            let result = op.execute(&ctx, cancel).await;
            WorkerEvent::AttemptFinished {
                task,
                attempt: number,
                result,
            }
        });
        self.in_flight.insert(handle.id(), attempt.task);
        self.publish();
    }

    fn arm_backoff(&mut self, task: TaskId, delay: Duration) {
        let name = task.clone();
        let handle = self.workers.spawn(async move {
            tokio::time::sleep(delay).await;
            WorkerEvent::BackoffElapsed { task: name }
        });
        self.in_flight.insert(handle.id(), task);
    }

    fn handle_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::AttemptFinished {
                task,
                attempt,
                result,
            } => {
                debug!(task = %task, date = %self.ctx.date(), attempt, ok = result.is_ok(), "attempt finished");
                let step = self.scheduler.step_completion(&task, result.into());
                self.apply(step);
            }
            WorkerEvent::BackoffElapsed { task } => {
                let step = self.scheduler.step_backoff_elapsed(&task);
                self.apply(step);
            }
        }
    }

    fn handle_join_error(&mut self, task: Option<TaskId>, err: tokio::task::JoinError) {
        let Some(task) = task else {
            warn!(error = %err, "unknown worker ended abnormally");
            return;
        };
        error!(task = %task, date = %self.ctx.date(), error = %err, "worker ended abnormally");
        if self.scheduler.state_of(&task) == Some(RunState::Retrying) {
            let step = self.scheduler.step_backoff_elapsed(&task);
            self.apply(step);
        } else {
            let step = self
                .scheduler
                .step_completion(&task, AttemptOutcome::permanent(format!("worker panicked: {err}")));
            self.apply(step);
        }
    }

    /// Act on what a scheduler step asks for, then publish.
    fn apply(&mut self, step: SchedulerStep) {
        if let Some(retry) = step.retry {
            debug!(
                task = %retry.task,
                next_attempt = retry.next_attempt,
                delay_ms = retry.delay.as_millis() as u64,
                "arming backoff timer"
            );
            self.arm_backoff(retry.task, retry.delay);
        }
        if !step.newly_ready.is_empty() {
            debug!(ready = ?step.newly_ready, "tasks became ready");
        }
        self.publish();
    }

    fn publish(&self) {
        self.store.publish(self.summary());
    }
}
