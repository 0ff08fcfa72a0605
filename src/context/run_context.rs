// src/context/run_context.rs

//! Per-date run context handed to operators.

use std::fmt;

use chrono::{Days, NaiveDate};

use crate::context::template::TemplateToken;

/// How a DAG run came to exist. Only affects `run_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    Scheduled,
    Manual,
    Backfill,
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunKind::Scheduled => f.write_str("scheduled"),
            RunKind::Manual => f.write_str("manual"),
            RunKind::Backfill => f.write_str("backfill"),
        }
    }
}

/// Everything an operator may know about the run it is part of.
///
/// One context exists per (pipeline, logical date); every attempt of every
/// task for that date sees the same context. The logical date is the
/// idempotency key: operators derive partition suffixes and staged-file names
/// from it, never from wall-clock time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pipeline_id: String,
    date: NaiveDate,
    kind: RunKind,
}

impl RunContext {
    pub fn for_date(pipeline_id: impl Into<String>, date: NaiveDate) -> Self {
        Self::with_kind(pipeline_id, date, RunKind::Scheduled)
    }

    pub fn with_kind(pipeline_id: impl Into<String>, date: NaiveDate, kind: RunKind) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            date,
            kind,
        }
    }

    pub fn pipeline_id(&self) -> &str {
        &self.pipeline_id
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn kind(&self) -> RunKind {
        self.kind
    }

    /// `YYYY-MM-DD`.
    pub fn ds(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }

    /// `YYYYMMDD`.
    pub fn ds_nodash(&self) -> String {
        self.date.format("%Y%m%d").to_string()
    }

    pub fn prev_ds(&self) -> String {
        self.date
            .checked_sub_days(Days::new(1))
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default()
    }

    pub fn next_ds(&self) -> String {
        self.date
            .checked_add_days(Days::new(1))
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default()
    }

    pub fn run_id(&self) -> String {
        format!("{}__{}", self.kind, self.ds())
    }

    /// Stable key for the external effects of `task` on this date.
    ///
    /// Deliberately independent of [`RunKind`]: a manual re-run and the
    /// scheduled run of the same date must address the same objects.
    pub fn idempotency_key(&self, task: &str) -> String {
        format!("{}/{}/{}", self.pipeline_id, task, self.ds())
    }

    /// Value substituted for a template token.
    pub fn value_of(&self, token: TemplateToken) -> String {
        match token {
            TemplateToken::Ds => self.ds(),
            TemplateToken::DsNodash => self.ds_nodash(),
            TemplateToken::PrevDs => self.prev_ds(),
            TemplateToken::NextDs => self.next_ds(),
            TemplateToken::RunId => self.run_id(),
            TemplateToken::PipelineId => self.pipeline_id.clone(),
        }
    }
}

/// Every date from `start` to `end` inclusive, ascending.
///
/// Returns an empty vector if `end < start`.
pub fn date_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start.iter_days().take_while(|d| *d <= end).collect()
}
