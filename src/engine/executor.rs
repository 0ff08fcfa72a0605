// src/engine/executor.rs

//! Fans one trigger out over its dates.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::context::RunContext;
use crate::dag::{DateScheduler, DependencyGraph};
use crate::engine::RunOptions;
use crate::engine::runtime::DagRunDriver;
use crate::engine::store::RunStore;
use crate::errors::Result;
use crate::exec::{OperatorBackend, OperatorSet};
use crate::report::{DagRunStatus, DagRunSummary};

/// Runs a dependency graph for one or more logical dates.
///
/// Every date gets its own [`DateScheduler`] and [`DagRunDriver`]; dates
/// share nothing but the worker semaphore, so a failure on one date never
/// affects another. Dates start in ascending order; at most
/// `max_active_runs` of them are active at once.
#[derive(Clone)]
pub struct Executor {
    graph: Arc<DependencyGraph>,
    operators: OperatorSet,
    store: Arc<RunStore>,
}

impl Executor {
    /// Resolve an operator for every task up front.
    ///
    /// Fails if the backend cannot build one (e.g. an unknown connection),
    /// before any run instance exists.
    pub fn new(graph: Arc<DependencyGraph>, backend: &dyn OperatorBackend) -> Result<Self> {
        let operators = OperatorSet::resolve(&graph, backend)?;
        Ok(Self {
            graph,
            operators,
            store: Arc::new(RunStore::new()),
        })
    }

    /// Publish run status into a shared store instead of a private one.
    pub fn with_store(mut self, store: Arc<RunStore>) -> Self {
        self.store = store;
        self
    }

    pub fn graph(&self) -> &Arc<DependencyGraph> {
        &self.graph
    }

    pub fn store(&self) -> &Arc<RunStore> {
        &self.store
    }

    /// Run every context to completion and return one summary per date,
    /// ascending.
    ///
    /// Contexts for the same date are collapsed into one run. Fails without
    /// starting anything if one of the dates already has an active run.
    pub async fn run(
        &self,
        contexts: Vec<RunContext>,
        options: RunOptions,
    ) -> Result<Vec<DagRunSummary>> {
        let options = RunOptions::new(options.concurrency_limit, options.max_active_runs);
        let permits = Arc::new(Semaphore::new(options.concurrency_limit));
        let drivers = self.prepare(contexts, permits)?;
        info!(
            runs = drivers.len(),
            concurrency = options.concurrency_limit,
            max_active_runs = options.max_active_runs,
            "executing DAG runs"
        );
        Ok(self.drive(drivers, options.max_active_runs).await)
    }

    /// Create one driver per distinct date and register all of them.
    ///
    /// Registration is all-or-nothing: if any date already has an active
    /// run, nothing is registered and stored runs are left as they were.
    fn prepare(
        &self,
        contexts: Vec<RunContext>,
        permits: Arc<Semaphore>,
    ) -> Result<Vec<DagRunDriver>> {
        let by_date: BTreeMap<NaiveDate, RunContext> =
            contexts.into_iter().map(|c| (c.date(), c)).collect();

        let mut drivers: Vec<DagRunDriver> = Vec::with_capacity(by_date.len());
        let mut registrations = Vec::with_capacity(by_date.len());
        for (date, ctx) in by_date {
            let scheduler = DateScheduler::new(Arc::clone(&self.graph), date);
            let cancel = CancellationToken::new();
            let initial = scheduler.summary(ctx.pipeline_id(), &ctx.run_id());
            registrations.push((initial, cancel.clone()));
            drivers.push(DagRunDriver::new(
                scheduler,
                ctx,
                self.operators.clone(),
                Arc::clone(&permits),
                cancel,
                Arc::clone(&self.store),
            ));
        }

        self.store.begin_all(registrations)?;
        Ok(drivers)
    }

    async fn drive(&self, drivers: Vec<DagRunDriver>, max_active_runs: usize) -> Vec<DagRunSummary> {
        let active_runs = Arc::new(Semaphore::new(max_active_runs));
        let mut runs = JoinSet::new();
        let mut started = HashMap::new();

        for driver in drivers {
            // Dates start in order: wait for a free slot before spawning the
            // next one.
            let slot = Arc::clone(&active_runs).acquire_owned().await.ok();
            let initial = driver.summary();
            let handle = runs.spawn(async move {
                let _slot = slot;
                driver.run().await
            });
            started.insert(handle.id(), initial);
        }

        let mut summaries = Vec::with_capacity(started.len());
        while let Some(joined) = runs.join_next_with_id().await {
            match joined {
                Ok((_, summary)) => summaries.push(summary),
                Err(err) => {
                    let Some(initial) = started.remove(&err.id()) else {
                        error!(error = %err, "DAG run driver ended abnormally");
                        continue;
                    };
                    error!(date = %initial.date, error = %err, "DAG run driver ended abnormally");
                    let mut summary = self
                        .store
                        .get(&initial.pipeline_id, initial.date)
                        .unwrap_or(initial);
                    summary.status = DagRunStatus::Failed;
                    self.store.publish(summary.clone());
                    summaries.push(summary);
                }
            }
        }

        summaries.sort_by_key(|s| s.date);
        summaries
    }
}
