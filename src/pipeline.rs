// src/pipeline.rs

//! A named dependency graph plus the settings it is triggered with.

use std::sync::Arc;

use chrono::{Days, NaiveDate};

use crate::config::model::ConfigFile;
use crate::context::date_range;
use crate::dag::DependencyGraph;
use crate::engine::RunOptions;
use crate::errors::Result;

/// Daily schedule of a pipeline.
///
/// The logical date of a daily run is the day whose data it processes, so
/// on `today` the latest date that can run is `today - 1`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Schedule {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub catchup: bool,
}

impl Schedule {
    /// Latest completed logical date as of `today`, bounded by `end_date`.
    pub fn latest_due(&self, today: NaiveDate) -> Option<NaiveDate> {
        let latest = today.checked_sub_days(Days::new(1))?;
        let latest = match self.end_date {
            Some(end) => latest.min(end),
            None => latest,
        };
        match self.start_date {
            Some(start) if latest < start => None,
            _ => Some(latest),
        }
    }

    /// Dates a scheduled trigger on `today` should run, ascending.
    ///
    /// With `catchup` this is every date from `start_date` to the latest
    /// completed day; without it only the latest completed day.
    pub fn due_dates(&self, today: NaiveDate) -> Vec<NaiveDate> {
        let Some(latest) = self.latest_due(today) else {
            return Vec::new();
        };
        match (self.catchup, self.start_date) {
            (true, Some(start)) => date_range(start, latest),
            _ => vec![latest],
        }
    }
}

/// A pipeline as registered with the [`crate::engine::Orchestrator`].
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub id: String,
    pub graph: Arc<DependencyGraph>,
    pub options: RunOptions,
    pub schedule: Schedule,
}

impl Pipeline {
    pub fn new(id: impl Into<String>, graph: DependencyGraph) -> Self {
        Self {
            id: id.into(),
            graph: Arc::new(graph),
            options: RunOptions::default(),
            schedule: Schedule::default(),
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Build the dependency graph of a validated config.
    pub fn from_config(cfg: &ConfigFile) -> Result<Self> {
        let graph = DependencyGraph::from_config(cfg)?;
        let p = &cfg.pipeline;
        Ok(Self::new(p.id.clone(), graph)
            .with_options(RunOptions::new(p.concurrency, p.max_active_runs))
            .with_schedule(Schedule {
                start_date: p.start_date,
                end_date: p.end_date,
                catchup: p.catchup,
            }))
    }
}
