// tests/property_scheduler.rs

mod common;
use crate::common::builders::{ConfigFileBuilder, TaskConfigBuilder};
use crate::common::date;

use std::collections::{BTreeSet, HashMap};

use proptest::prelude::*;
use ingestdag::dag::{DateScheduler, RunState};
use ingestdag::engine::AttemptOutcome;
use ingestdag::pipeline::Pipeline;

fn name(i: usize) -> String {
    format!("task_{i:02}")
}

// Acyclic by construction: task N may only depend on tasks 0..N-1.
fn deps_strategy(max_tasks: usize) -> impl Strategy<Value = Vec<BTreeSet<usize>>> {
    (1..=max_tasks).prop_flat_map(|num_tasks| {
        proptest::collection::vec(
            proptest::collection::vec(any::<usize>(), 0..3),
            num_tasks,
        )
        .prop_map(|raw| {
            raw.into_iter()
                .enumerate()
                .map(|(i, picks)| {
                    if i == 0 {
                        BTreeSet::new()
                    } else {
                        picks.into_iter().map(|p| p % i).collect()
                    }
                })
                .collect()
        })
    })
}

fn scheduler_for(deps: &[BTreeSet<usize>]) -> DateScheduler {
    let mut builder = ConfigFileBuilder::new("prop");
    for (i, ups) in deps.iter().enumerate() {
        let mut task = TaskConfigBuilder::shell(&format!("echo {} {{{{ ds }}}}", name(i)))
            .retries(1)
            .backoff("1s");
        for up in ups {
            task = task.upstream(&name(*up));
        }
        builder = builder.with_task(&name(i), task.build());
    }
    let pipeline = Pipeline::from_config(&builder.build()).expect("acyclic graph");
    DateScheduler::new(pipeline.graph, date(2023, 6, 1))
}

/// State every task must end in, given which tasks fail for good.
fn expected_states(deps: &[BTreeSet<usize>], failing: &BTreeSet<usize>) -> Vec<RunState> {
    let mut states: Vec<RunState> = Vec::with_capacity(deps.len());
    for (i, ups) in deps.iter().enumerate() {
        let state = if ups.iter().any(|u| states[*u] != RunState::Success) {
            RunState::UpstreamFailed
        } else if failing.contains(&i) {
            RunState::Failed
        } else {
            RunState::Success
        };
        states.push(state);
    }
    states
}

proptest! {
    #[test]
    fn runs_terminate_in_dependency_order(
        deps in deps_strategy(10),
        failing in proptest::collection::btree_set(0..10usize, 0..4),
        flaky in proptest::collection::btree_set(0..10usize, 0..4),
        picks in proptest::collection::vec(any::<usize>(), 1..32),
    ) {
        let n = deps.len();
        let failing: BTreeSet<usize> = failing.into_iter().filter(|i| *i < n).collect();
        let flaky: BTreeSet<usize> = flaky.into_iter().filter(|i| *i < n).collect();
        let index: HashMap<String, usize> = (0..n).map(|i| (name(i), i)).collect();

        let mut s = scheduler_for(&deps);
        s.start();

        // (task, attempt) in flight, and tasks waiting on a backoff.
        let mut executing: Vec<(String, u32)> = Vec::new();
        let mut backing_off: Vec<String> = Vec::new();
        let mut picks = picks.into_iter().cycle();
        let mut steps = 0;

        loop {
            while let Some(attempt) = s.dispatch_next() {
                prop_assert_eq!(
                    s.upstream_satisfied(&attempt.task),
                    Some(true),
                    "{} dispatched before its upstream succeeded",
                    attempt.task
                );
                executing.push((attempt.task, attempt.attempt));
            }

            let pending = executing.len() + backing_off.len();
            if pending == 0 {
                break;
            }
            steps += 1;
            prop_assert!(steps < 1000, "simulation did not terminate");

            let pick = picks.next().unwrap_or(0) % pending;
            if pick < executing.len() {
                let (task, attempt) = executing.remove(pick);
                let i = index[&task];
                let outcome = if failing.contains(&i) {
                    AttemptOutcome::permanent("boom")
                } else if flaky.contains(&i) && attempt == 1 {
                    AttemptOutcome::transient("connection reset")
                } else {
                    AttemptOutcome::success("")
                };
                let step = s.step_completion(&task, outcome);
                if let Some(retry) = step.retry {
                    prop_assert_eq!(retry.next_attempt, 2);
                    backing_off.push(retry.task);
                }
            } else {
                let task = backing_off.remove(pick - executing.len());
                s.step_backoff_elapsed(&task);
            }
        }

        prop_assert!(s.is_finished());
        prop_assert!(s.check_stalled().newly_failed.is_empty());

        let expected = expected_states(&deps, &failing);
        for (i, want) in expected.iter().enumerate() {
            let inst = s.instance(&name(i)).expect("instance exists");
            prop_assert_eq!(inst.state, *want, "state of {}", name(i));

            let max_attempts = if flaky.contains(&i) && !failing.contains(&i) { 2 } else { 1 };
            prop_assert!(inst.attempts <= max_attempts, "{} ran {} times", name(i), inst.attempts);
            if *want == RunState::UpstreamFailed {
                prop_assert_eq!(inst.attempts, 0);
            }
        }
    }
}
