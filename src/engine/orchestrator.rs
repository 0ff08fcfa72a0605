// src/engine/orchestrator.rs

//! Trigger interface: start, inspect and abort DAG runs by pipeline id.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::info;

use crate::context::{RunContext, RunKind, date_range};
use crate::engine::executor::Executor;
use crate::engine::store::RunStore;
use crate::errors::{IngestError, Result};
use crate::exec::OperatorBackend;
use crate::pipeline::Pipeline;
use crate::report::DagRunSummary;

struct Registered {
    pipeline: Pipeline,
    executor: Executor,
}

/// Holds the registered pipelines and the status of their runs.
///
/// There is no global registry: callers build an `Orchestrator`, register
/// pipelines on it and pass it (usually behind an `Arc`) to whatever needs
/// to trigger or abort runs.
pub struct Orchestrator {
    pipelines: BTreeMap<String, Registered>,
    store: Arc<RunStore>,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Orchestrator {
    pub fn new() -> Self {
        Self {
            pipelines: BTreeMap::new(),
            store: Arc::new(RunStore::new()),
        }
    }

    /// Register a pipeline, resolving its operators through `backend`.
    ///
    /// Re-registering an id replaces the previous pipeline.
    pub fn register(&mut self, pipeline: Pipeline, backend: &dyn OperatorBackend) -> Result<()> {
        let executor = Executor::new(Arc::clone(&pipeline.graph), backend)?
            .with_store(Arc::clone(&self.store));
        info!(
            pipeline = %pipeline.id,
            tasks = pipeline.graph.len(),
            "registered pipeline"
        );
        self.pipelines
            .insert(pipeline.id.clone(), Registered { pipeline, executor });
        Ok(())
    }

    pub fn pipeline(&self, graph_id: &str) -> Option<&Pipeline> {
        self.pipelines.get(graph_id).map(|r| &r.pipeline)
    }

    pub fn pipeline_ids(&self) -> impl Iterator<Item = &str> {
        self.pipelines.keys().map(String::as_str)
    }

    pub fn store(&self) -> &Arc<RunStore> {
        &self.store
    }

    /// Run the pipeline for one date and wait for the run to finish.
    pub async fn trigger_date(&self, graph_id: &str, date: NaiveDate) -> Result<DagRunSummary> {
        let reg = self.lookup(graph_id)?;
        let ctx = RunContext::with_kind(graph_id, date, RunKind::Manual);
        let mut summaries = reg.executor.run(vec![ctx], reg.pipeline.options).await?;
        summaries.pop().ok_or_else(|| {
            IngestError::Other(anyhow::anyhow!("run for {date} produced no summary"))
        })
    }

    /// Backfill every date from `start` to `end` inclusive.
    ///
    /// Returns one summary per date, ascending.
    pub async fn trigger_range(
        &self,
        graph_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DagRunSummary>> {
        let reg = self.lookup(graph_id)?;
        if end < start {
            return Err(IngestError::ConfigError(format!(
                "backfill range is empty: {end} is before {start}"
            )));
        }
        let contexts = date_range(start, end)
            .into_iter()
            .map(|d| RunContext::with_kind(graph_id, d, RunKind::Backfill))
            .collect();
        reg.executor.run(contexts, reg.pipeline.options).await
    }

    /// Run whatever the pipeline's schedule says is due on `today`.
    pub async fn trigger_scheduled(
        &self,
        graph_id: &str,
        today: NaiveDate,
    ) -> Result<Vec<DagRunSummary>> {
        let reg = self.lookup(graph_id)?;
        let dates = reg.pipeline.schedule.due_dates(today);
        info!(pipeline = %graph_id, %today, due = dates.len(), "scheduled trigger");
        let contexts = dates
            .into_iter()
            .map(|d| RunContext::with_kind(graph_id, d, RunKind::Scheduled))
            .collect();
        reg.executor.run(contexts, reg.pipeline.options).await
    }

    /// Latest status of the run for `date`, or `None` if it was never
    /// triggered.
    pub fn get_run_status(&self, graph_id: &str, date: NaiveDate) -> Result<Option<DagRunSummary>> {
        self.lookup(graph_id)?;
        Ok(self.store.get(graph_id, date))
    }

    /// Abort the active run for `date`.
    ///
    /// Returns `false` if there is no active run for that date.
    pub fn abort(&self, graph_id: &str, date: NaiveDate) -> Result<bool> {
        self.lookup(graph_id)?;
        Ok(self.store.abort(graph_id, date))
    }

    /// Abort every active run of every pipeline.
    pub fn abort_all(&self) -> usize {
        self.store.abort_all()
    }

    fn lookup(&self, graph_id: &str) -> Result<&Registered> {
        self.pipelines
            .get(graph_id)
            .ok_or_else(|| IngestError::UnknownPipeline(graph_id.to_string()))
    }
}
