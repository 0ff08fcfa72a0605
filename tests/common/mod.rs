#![allow(dead_code)]

pub use ingestdag_test_utils::builders;
pub use ingestdag_test_utils::fake_operator;
pub use ingestdag_test_utils::{date, init_tracing, with_timeout};

use std::sync::Arc;

use ingestdag::dag::{DependencyGraph, Task};

/// The six raw-ingestion loaders, chained in load order.
pub const RAW_CHAIN: [&str; 6] = [
    "load_raw_users",
    "load_raw_merchants",
    "load_raw_device_fingerprints",
    "load_raw_payment_events",
    "load_raw_chargebacks",
    "load_raw_fx_rates_daily",
];

/// Build a graph of shell tasks from `(id, "up1,up2")` pairs.
pub fn graph_of(edges: &[(&str, &str)]) -> DependencyGraph {
    DependencyGraph::build(tasks_of(edges)).expect("valid test graph")
}

pub fn tasks_of(edges: &[(&str, &str)]) -> Vec<Task> {
    edges.iter()
        .map(|(id, ups)| {
            ups.split(',')
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .fold(Task::shell(*id, format!("echo {id} {{{{ ds }}}}")), |t, u| t.after(u))
        })
        .collect()
}

/// The six loaders as a linear chain of sql tasks.
pub fn raw_chain_graph() -> Arc<DependencyGraph> {
    let mut prev: Option<&str> = None;
    let mut tasks = Vec::new();
    for id in RAW_CHAIN {
        let mut t = Task::sql(
            id,
            "snowflake_default",
            format!("COPY INTO RAW.{} FROM @STAGE/{id}_{{{{ ds }}}}.csv", id.to_uppercase()),
        );
        if let Some(p) = prev {
            t = t.after(p);
        }
        tasks.push(t);
        prev = Some(id);
    }
    Arc::new(DependencyGraph::build(tasks).expect("valid chain"))
}
