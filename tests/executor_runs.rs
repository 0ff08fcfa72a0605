// tests/executor_runs.rs

mod common;
use crate::common::fake_operator::{EventKind, FakeBackend, Script};
use crate::common::{RAW_CHAIN, date, graph_of, init_tracing, raw_chain_graph, tasks_of, with_timeout};

use std::sync::Arc;
use std::time::Duration;

use ingestdag::context::{RunContext, RunKind};
use ingestdag::dag::{DependencyGraph, RetryPolicy, RunState};
use ingestdag::engine::{Executor, RunOptions};
use ingestdag::report::DagRunStatus;
use ingestdag::types::ErrorClass;

fn manual(pipeline: &str, d: chrono::NaiveDate) -> RunContext {
    RunContext::with_kind(pipeline, d, RunKind::Manual)
}

#[tokio::test]
async fn six_step_chain_fails_at_device_fingerprints() {
    init_tracing();
    let day = date(2023, 6, 1);
    let backend = FakeBackend::new().with_script(
        "load_raw_device_fingerprints",
        Script::FailPermanent("stage file missing".into()),
    );
    let recorder = backend.recorder();
    let executor = Executor::new(raw_chain_graph(), &backend).unwrap();

    let summaries = with_timeout(executor.run(
        vec![manual("fintech_raw_ingestion", day)],
        RunOptions::new(4, 1),
    ))
    .await
    .unwrap();

    assert_eq!(summaries.len(), 1);
    let run = &summaries[0];
    assert_eq!(run.status, DagRunStatus::Failed);
    assert_eq!(run.run_id, "manual__2023-06-01");

    assert_eq!(run.state_of("load_raw_users"), Some(RunState::Success));
    assert_eq!(run.state_of("load_raw_merchants"), Some(RunState::Success));
    assert_eq!(run.state_of("load_raw_device_fingerprints"), Some(RunState::Failed));
    for t in ["load_raw_payment_events", "load_raw_chargebacks", "load_raw_fx_rates_daily"] {
        assert_eq!(run.state_of(t), Some(RunState::UpstreamFailed), "{t}");
        assert!(!recorder.was_dispatched(t, day), "{t} must never be dispatched");
        assert_eq!(run.task(t).unwrap().attempts, 0);
    }

    let failed = run.task("load_raw_device_fingerprints").unwrap();
    assert_eq!(failed.error_class, Some(ErrorClass::Permanent));
    assert_eq!(failed.error.as_deref(), Some("stage file missing"));

    assert_eq!(
        recorder.dispatched(day),
        vec!["load_raw_users", "load_raw_merchants", "load_raw_device_fingerprints"]
    );
}

#[tokio::test]
async fn retry_accounting_with_always_transient_operator() {
    init_tracing();
    let day = date(2023, 6, 1);
    let tasks = tasks_of(&[("load", ""), ("transform", "load")])
        .into_iter()
        .map(|t| {
            if t.id == "load" {
                t.with_retry(RetryPolicy::new(1, Duration::from_millis(20)))
            } else {
                t
            }
        });
    let graph = Arc::new(DependencyGraph::build(tasks).unwrap());
    let backend = FakeBackend::new().with_script("load", Script::FailTransient("timeout".into()));
    let recorder = backend.recorder();
    let executor = Executor::new(graph, &backend).unwrap();

    let summaries = with_timeout(executor.run(vec![manual("p", day)], RunOptions::default()))
        .await
        .unwrap();
    let run = &summaries[0];

    assert_eq!(recorder.attempts("load", day), 2);
    assert_eq!(run.task("load").unwrap().attempts, 2);
    assert_eq!(run.state_of("load"), Some(RunState::Failed));
    assert_eq!(run.task("load").unwrap().error_class, Some(ErrorClass::Transient));
    assert_eq!(run.state_of("transform"), Some(RunState::UpstreamFailed));
    assert!(!recorder.was_dispatched("transform", day));
    assert_eq!(run.status, DagRunStatus::Failed);
}

#[tokio::test]
async fn transient_failure_recovers_within_retry_limit() {
    init_tracing();
    let day = date(2023, 6, 1);
    let tasks = tasks_of(&[("load", ""), ("transform", "load")])
        .into_iter()
        .map(|t| t.with_retry(RetryPolicy::new(3, Duration::from_millis(10))));
    let graph = Arc::new(DependencyGraph::build(tasks).unwrap());
    let backend = FakeBackend::new().with_script("load", Script::TransientThenSucceed(2));
    let recorder = backend.recorder();
    let executor = Executor::new(graph, &backend).unwrap();

    let summaries = with_timeout(executor.run(vec![manual("p", day)], RunOptions::default()))
        .await
        .unwrap();

    assert_eq!(summaries[0].status, DagRunStatus::Success);
    assert_eq!(recorder.attempts("load", day), 3);
    assert_eq!(recorder.attempts("transform", day), 1);
}

#[tokio::test]
async fn permanent_failure_is_not_retried() {
    let day = date(2023, 6, 1);
    let tasks = tasks_of(&[("load", "")])
        .into_iter()
        .map(|t| t.with_retry(RetryPolicy::new(5, Duration::ZERO)));
    let graph = Arc::new(DependencyGraph::build(tasks).unwrap());
    let backend = FakeBackend::new().with_script("load", Script::FailPermanent("bad sql".into()));
    let recorder = backend.recorder();
    let executor = Executor::new(graph, &backend).unwrap();

    let summaries = with_timeout(executor.run(vec![manual("p", day)], RunOptions::default()))
        .await
        .unwrap();
    assert_eq!(summaries[0].status, DagRunStatus::Failed);
    assert_eq!(recorder.attempts("load", day), 1);
}

#[tokio::test]
async fn backfill_of_three_days_yields_three_independent_runs() {
    init_tracing();
    let days = [date(2023, 6, 1), date(2023, 6, 2), date(2023, 6, 3)];
    let backend = FakeBackend::new();
    let recorder = backend.recorder();
    let executor = Executor::new(raw_chain_graph(), &backend).unwrap();

    let contexts = days
        .iter()
        .map(|d| RunContext::with_kind("fintech_raw_ingestion", *d, RunKind::Backfill))
        .collect();
    let summaries = with_timeout(executor.run(contexts, RunOptions::new(4, 3)))
        .await
        .unwrap();

    assert_eq!(summaries.len(), 3);
    for (summary, day) in summaries.iter().zip(days) {
        assert_eq!(summary.date, day);
        assert_eq!(summary.status, DagRunStatus::Success);
        assert_eq!(summary.run_id, format!("backfill__{day}"));
        assert_eq!(recorder.dispatched(day), RAW_CHAIN.to_vec());
    }
    assert_eq!(recorder.dates(), days.to_vec());
}

#[tokio::test]
async fn failure_on_one_date_does_not_touch_other_dates() {
    let days = [date(2023, 6, 1), date(2023, 6, 2)];
    let graph = Arc::new(graph_of(&[("a", ""), ("b", "a")]));
    // `a` always fails; every date must still get its own complete run.
    let backend = FakeBackend::new().with_script("a", Script::FailPermanent("nope".into()));
    let recorder = backend.recorder();
    let executor = Executor::new(graph, &backend).unwrap();

    let contexts = days.iter().map(|d| manual("p", *d)).collect();
    let summaries = with_timeout(executor.run(contexts, RunOptions::new(2, 2)))
        .await
        .unwrap();

    assert_eq!(summaries.len(), 2);
    for (s, d) in summaries.iter().zip(days) {
        assert_eq!(s.status, DagRunStatus::Failed);
        assert_eq!(recorder.attempts("a", d), 1);
        assert_eq!(s.state_of("b"), Some(RunState::UpstreamFailed));
    }
}

#[tokio::test]
async fn dates_start_in_ascending_order_with_one_active_run() {
    let days = [date(2023, 6, 3), date(2023, 6, 1), date(2023, 6, 2)];
    let graph = Arc::new(graph_of(&[("a", ""), ("b", "a")]));
    let backend = FakeBackend::new();
    let recorder = backend.recorder();
    let executor = Executor::new(graph, &backend).unwrap();

    let contexts = days.iter().map(|d| manual("p", *d)).collect();
    let summaries = with_timeout(executor.run(contexts, RunOptions::new(4, 1)))
        .await
        .unwrap();

    let dates: Vec<_> = summaries.iter().map(|s| s.date).collect();
    assert_eq!(dates, vec![date(2023, 6, 1), date(2023, 6, 2), date(2023, 6, 3)]);

    // With max_active_runs = 1 each date finishes before the next starts.
    let events = recorder.events();
    let first_dates: Vec<_> = events
        .iter()
        .filter(|e| e.kind == EventKind::Started)
        .map(|e| e.date)
        .collect();
    let mut sorted = first_dates.clone();
    sorted.sort();
    assert_eq!(first_dates, sorted);
}

#[tokio::test]
async fn upstream_finishes_before_downstream_starts() {
    let day = date(2023, 6, 1);
    let graph = Arc::new(graph_of(&[
        ("extract", ""),
        ("a", "extract"),
        ("b", "extract"),
        ("c", "extract"),
        ("merge", "a,b,c"),
    ]));
    let backend = FakeBackend::new().with_delay(Duration::from_millis(20));
    let recorder = backend.recorder();
    let executor = Executor::new(Arc::clone(&graph), &backend).unwrap();

    let summaries = with_timeout(executor.run(vec![manual("p", day)], RunOptions::new(8, 1)))
        .await
        .unwrap();
    assert_eq!(summaries[0].status, DagRunStatus::Success);

    for id in graph.topological_order() {
        let start = recorder.position(id, day, EventKind::Started).unwrap();
        for up in graph.upstream_of(id) {
            let up_done = recorder.last_finish(up, day).unwrap();
            assert!(up_done < start, "{up} must finish before {id} starts");
        }
    }
    // The three branches overlap.
    assert!(recorder.max_concurrency() >= 3, "fan-out should run in parallel");
}

#[tokio::test]
async fn concurrency_limit_is_shared_across_dates() {
    let days = [date(2023, 6, 1), date(2023, 6, 2), date(2023, 6, 3)];
    let graph = Arc::new(graph_of(&[("a", ""), ("b", ""), ("c", ""), ("d", "")]));
    let backend = FakeBackend::new().with_delay(Duration::from_millis(20));
    let recorder = backend.recorder();
    let executor = Executor::new(graph, &backend).unwrap();

    let contexts = days.iter().map(|d| manual("p", *d)).collect();
    let summaries = with_timeout(executor.run(contexts, RunOptions::new(2, 3)))
        .await
        .unwrap();

    assert!(summaries.iter().all(|s| s.is_success()));
    assert!(recorder.max_concurrency() <= 2, "got {}", recorder.max_concurrency());
    assert_eq!(recorder.events().len(), 3 * 4 * 2);
}

#[tokio::test]
async fn rerunning_a_date_leaves_one_row_per_task() {
    let day = date(2023, 6, 1);
    let backend = FakeBackend::new();
    let warehouse = backend.warehouse();
    let executor = Executor::new(raw_chain_graph(), &backend).unwrap();

    for _ in 0..2 {
        let summaries = with_timeout(
            executor.run(vec![manual("fintech_raw_ingestion", day)], RunOptions::default()),
        )
        .await
        .unwrap();
        assert!(summaries[0].is_success());
    }

    assert_eq!(warehouse.writes(), 12);
    let rows = warehouse.rows();
    assert_eq!(rows.len(), 6);
    assert!(rows.contains_key("fintech_raw_ingestion/load_raw_users/2023-06-01"));
}

#[tokio::test]
async fn duplicate_dates_collapse_into_one_run() {
    let day = date(2023, 6, 1);
    let backend = FakeBackend::new();
    let recorder = backend.recorder();
    let executor = Executor::new(Arc::new(graph_of(&[("a", "")])), &backend).unwrap();

    let summaries = with_timeout(
        executor.run(vec![manual("p", day), manual("p", day)], RunOptions::default()),
    )
    .await
    .unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(recorder.attempts("a", day), 1);
}

#[tokio::test]
async fn empty_date_list_runs_nothing() {
    let backend = FakeBackend::new();
    let executor = Executor::new(Arc::new(graph_of(&[("a", "")])), &backend).unwrap();
    let summaries = executor.run(Vec::new(), RunOptions::default()).await.unwrap();
    assert!(summaries.is_empty());
}

#[tokio::test]
async fn summaries_are_published_to_the_store() {
    let day = date(2023, 6, 1);
    let backend = FakeBackend::new();
    let executor = Executor::new(Arc::new(graph_of(&[("a", ""), ("b", "a")])), &backend).unwrap();

    assert!(executor.store().get("p", day).is_none());
    let summaries = with_timeout(executor.run(vec![manual("p", day)], RunOptions::default()))
        .await
        .unwrap();

    let stored = executor.store().get("p", day).unwrap();
    assert_eq!(stored, summaries[0]);
    assert!(!executor.store().is_active("p", day));
}
