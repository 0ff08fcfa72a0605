// src/engine/store.rs

//! Latest known status of every DAG run, keyed by (pipeline, date).

use std::collections::BTreeMap;

use chrono::NaiveDate;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::errors::{IngestError, Result};
use crate::report::DagRunSummary;

type RunKey = (String, NaiveDate);

#[derive(Debug)]
struct RunRecord {
    summary: DagRunSummary,
    cancel: CancellationToken,
}

impl RunRecord {
    fn is_active(&self) -> bool {
        !self.summary.is_terminal()
    }
}

/// Shared run registry.
///
/// Drivers publish a fresh summary after every scheduler step; the trigger
/// interface reads from here and cancels runs through the stored token.
/// Finished runs stay readable until the same date is triggered again.
#[derive(Debug, Default)]
pub struct RunStore {
    runs: Mutex<BTreeMap<RunKey, RunRecord>>,
}

impl RunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the runs of one trigger, all or none.
    ///
    /// Fails with [`IngestError::RunInProgress`] if the same pipeline already
    /// has an active run for any of the dates; in that case the store is left
    /// untouched. Otherwise each run replaces the finished record of its
    /// date, if any.
    pub fn begin_all(&self, runs: Vec<(DagRunSummary, CancellationToken)>) -> Result<()> {
        let mut stored = self.runs.lock();
        if let Some((summary, _)) = runs.iter().find(|(summary, _)| {
            stored
                .get(&(summary.pipeline_id.clone(), summary.date))
                .is_some_and(RunRecord::is_active)
        }) {
            return Err(IngestError::RunInProgress {
                pipeline: summary.pipeline_id.clone(),
                date: summary.date,
            });
        }
        for (summary, cancel) in runs {
            let key = (summary.pipeline_id.clone(), summary.date);
            debug!(pipeline = %key.0, date = %key.1, run_id = %summary.run_id, "registered DAG run");
            stored.insert(key, RunRecord { summary, cancel });
        }
        Ok(())
    }

    /// Replace the stored summary of a registered run.
    pub fn publish(&self, summary: DagRunSummary) {
        let key = (summary.pipeline_id.clone(), summary.date);
        let mut runs = self.runs.lock();
        match runs.get_mut(&key) {
            Some(rec) => rec.summary = summary,
            None => {
                runs.insert(
                    key,
                    RunRecord {
                        summary,
                        cancel: CancellationToken::new(),
                    },
                );
            }
        }
    }

    pub fn get(&self, pipeline_id: &str, date: NaiveDate) -> Option<DagRunSummary> {
        self.runs
            .lock()
            .get(&(pipeline_id.to_string(), date))
            .map(|rec| rec.summary.clone())
    }

    pub fn is_active(&self, pipeline_id: &str, date: NaiveDate) -> bool {
        self.runs
            .lock()
            .get(&(pipeline_id.to_string(), date))
            .is_some_and(RunRecord::is_active)
    }

    /// Request cancellation of an active run.
    ///
    /// Returns `false` if no such run is active.
    pub fn abort(&self, pipeline_id: &str, date: NaiveDate) -> bool {
        let runs = self.runs.lock();
        match runs.get(&(pipeline_id.to_string(), date)) {
            Some(rec) if rec.is_active() => {
                info!(pipeline = %pipeline_id, %date, "abort requested");
                rec.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Request cancellation of every active run. Returns how many were
    /// signalled.
    pub fn abort_all(&self) -> usize {
        let runs = self.runs.lock();
        let mut n = 0;
        for ((pipeline, date), rec) in runs.iter() {
            if rec.is_active() {
                info!(%pipeline, %date, "abort requested");
                rec.cancel.cancel();
                n += 1;
            }
        }
        n
    }
}
