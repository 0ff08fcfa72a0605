use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;
use ingestdag::context::{RunContext, Template};
use ingestdag::dag::Task;
use ingestdag::errors::Result;
use ingestdag::exec::{
    ExternalOperator, OperatorBackend, OperatorError, OperatorFuture, OperatorOutput,
    SqlConnection, StatementFuture,
};
use ingestdag::types::OperatorKind;

/// What a fake operator does when invoked.
#[derive(Debug, Clone)]
pub enum Script {
    Succeed,
    FailPermanent(String),
    /// Fail transiently on every attempt.
    FailTransient(String),
    /// Fail transiently this many times, then succeed.
    TransientThenSucceed(u32),
    /// Never finish on its own; only cancellation ends the attempt.
    Hang,
}

/// Whether a recorded event marks the start or the end of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Started,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub task: String,
    pub date: NaiveDate,
    pub attempt: u32,
    pub kind: EventKind,
}

#[derive(Debug, Default)]
struct RecorderState {
    events: Vec<RecordedEvent>,
    attempts: HashMap<(String, NaiveDate), u32>,
    running: usize,
    max_running: usize,
}

/// Shared log of every fake attempt, in the order they happened.
#[derive(Debug, Default)]
pub struct Recorder {
    state: Mutex<RecorderState>,
}

impl Recorder {
    /// Record an attempt start; returns its attempt number (1-based).
    fn started(&self, task: &str, date: NaiveDate) -> u32 {
        let mut st = self.state.lock().unwrap();
        let n = {
            let counter = st.attempts.entry((task.to_string(), date)).or_insert(0);
            *counter += 1;
            *counter
        };
        st.running += 1;
        st.max_running = st.max_running.max(st.running);
        st.events.push(RecordedEvent {
            task: task.to_string(),
            date,
            attempt: n,
            kind: EventKind::Started,
        });
        n
    }

    fn finished(&self, task: &str, date: NaiveDate, attempt: u32) {
        let mut st = self.state.lock().unwrap();
        st.running -= 1;
        st.events.push(RecordedEvent {
            task: task.to_string(),
            date,
            attempt,
            kind: EventKind::Finished,
        });
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.state.lock().unwrap().events.clone()
    }

    /// Task ids in the order their first attempt started, for one date.
    pub fn dispatched(&self, date: NaiveDate) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.date == date && e.kind == EventKind::Started && e.attempt == 1)
            .map(|e| e.task)
            .collect()
    }

    /// Distinct dates that saw at least one attempt, ascending.
    pub fn dates(&self) -> Vec<NaiveDate> {
        let mut dates: Vec<NaiveDate> = self.events().into_iter().map(|e| e.date).collect();
        dates.sort();
        dates.dedup();
        dates
    }

    pub fn attempts(&self, task: &str, date: NaiveDate) -> u32 {
        self.state
            .lock()
            .unwrap()
            .attempts
            .get(&(task.to_string(), date))
            .copied()
            .unwrap_or(0)
    }

    pub fn was_dispatched(&self, task: &str, date: NaiveDate) -> bool {
        self.attempts(task, date) > 0
    }

    /// Index in [`Recorder::events`] of the first matching event.
    pub fn position(&self, task: &str, date: NaiveDate, kind: EventKind) -> Option<usize> {
        self.events()
            .iter()
            .position(|e| e.task == task && e.date == date && e.kind == kind)
    }

    /// Index of the last `Finished` event of a task on a date.
    pub fn last_finish(&self, task: &str, date: NaiveDate) -> Option<usize> {
        self.events()
            .iter()
            .rposition(|e| e.task == task && e.date == date && e.kind == EventKind::Finished)
    }

    /// Highest number of attempts that were in flight at the same time.
    pub fn max_concurrency(&self) -> usize {
        self.state.lock().unwrap().max_running
    }
}

/// In-memory stand-in for a warehouse table written by loaders.
///
/// Writes are upserts keyed by the run context's idempotency key, the way a
/// date-partitioned overwrite behaves.
#[derive(Debug, Default)]
pub struct FakeWarehouse {
    rows: Mutex<BTreeMap<String, String>>,
    writes: Mutex<usize>,
}

impl FakeWarehouse {
    pub fn upsert(&self, key: String, value: String) {
        self.rows.lock().unwrap().insert(key, value);
        *self.writes.lock().unwrap() += 1;
    }

    pub fn rows(&self) -> BTreeMap<String, String> {
        self.rows.lock().unwrap().clone()
    }

    pub fn writes(&self) -> usize {
        *self.writes.lock().unwrap()
    }
}

/// A fake operator that:
/// - records every attempt in a shared [`Recorder`]
/// - sleeps for a fixed delay (so concurrency can be observed)
/// - then follows its [`Script`]
/// - writes one row per successful attempt to the [`FakeWarehouse`].
pub struct FakeOperator {
    task: String,
    script: Script,
    delay: Duration,
    recorder: Arc<Recorder>,
    warehouse: Arc<FakeWarehouse>,
}

impl FakeOperator {
    async fn attempt(&self, ctx: &RunContext, n: u32) -> std::result::Result<OperatorOutput, OperatorError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.script {
            Script::Succeed => {}
            Script::FailPermanent(msg) => return Err(OperatorError::permanent(msg.clone())),
            Script::FailTransient(msg) => return Err(OperatorError::transient(msg.clone())),
            Script::TransientThenSucceed(k) if n <= *k => {
                return Err(OperatorError::transient(format!("transient failure #{n}")));
            }
            Script::TransientThenSucceed(_) => {}
            Script::Hang => std::future::pending::<()>().await,
        }
        self.warehouse
            .upsert(ctx.idempotency_key(&self.task), ctx.run_id());
        Ok(OperatorOutput {
            output: format!("{} ok for {}", self.task, ctx.ds()),
            rows_affected: None,
        })
    }
}

impl ExternalOperator for FakeOperator {
    fn kind(&self) -> OperatorKind {
        OperatorKind::ShellCommand
    }

    fn describe(&self, ctx: &RunContext) -> String {
        format!("fake {} {}", self.task, ctx.ds())
    }

    fn execute<'a>(&'a self, ctx: &'a RunContext, cancel: CancellationToken) -> OperatorFuture<'a> {
        Box::pin(async move {
            let n = self.recorder.started(&self.task, ctx.date());
            let result = tokio::select! {
                r = self.attempt(ctx, n) => r,
                _ = cancel.cancelled() => Err(OperatorError::Cancelled { output: String::new() }),
            };
            self.recorder.finished(&self.task, ctx.date(), n);
            result
        })
    }
}

/// Operator backend handing out [`FakeOperator`]s.
///
/// Tasks without an explicit script succeed.
pub struct FakeBackend {
    scripts: HashMap<String, Script>,
    delay: Duration,
    recorder: Arc<Recorder>,
    warehouse: Arc<FakeWarehouse>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            delay: Duration::from_millis(5),
            recorder: Arc::new(Recorder::default()),
            warehouse: Arc::new(FakeWarehouse::default()),
        }
    }

    pub fn with_script(mut self, task: &str, script: Script) -> Self {
        self.scripts.insert(task.to_string(), script);
        self
    }

    /// How long every fake attempt takes.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn recorder(&self) -> Arc<Recorder> {
        Arc::clone(&self.recorder)
    }

    pub fn warehouse(&self) -> Arc<FakeWarehouse> {
        Arc::clone(&self.warehouse)
    }
}

impl OperatorBackend for FakeBackend {
    fn operator_for(&self, task: &Task, _template: &Template) -> Result<Arc<dyn ExternalOperator>> {
        let script = self
            .scripts
            .get(&task.id)
            .cloned()
            .unwrap_or(Script::Succeed);
        Ok(Arc::new(FakeOperator {
            task: task.id.clone(),
            script,
            delay: self.delay,
            recorder: Arc::clone(&self.recorder),
            warehouse: Arc::clone(&self.warehouse),
        }))
    }
}

/// A [`SqlConnection`] that records statements and replays scripted
/// results in order; once the script runs out every statement affects one
/// row.
#[derive(Debug, Default)]
pub struct RecordingConnection {
    statements: Mutex<Vec<String>>,
    results: Mutex<Vec<std::result::Result<u64, OperatorError>>>,
}

impl RecordingConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the result of the next unscripted statement.
    pub fn then(self, result: std::result::Result<u64, OperatorError>) -> Self {
        self.results.lock().unwrap().push(result);
        self
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }
}

impl SqlConnection for RecordingConnection {
    fn execute<'a>(&'a self, statement: &'a str) -> StatementFuture<'a> {
        Box::pin(async move {
            self.statements.lock().unwrap().push(statement.to_string());
            let mut results = self.results.lock().unwrap();
            if results.is_empty() {
                Ok(1)
            } else {
                results.remove(0)
            }
        })
    }
}
