// src/lib.rs

pub mod cli;
pub mod config;
pub mod context;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod pipeline;
pub mod report;
pub mod types;

use std::sync::Arc;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::cli::{CliArgs, DateSelection};
use crate::config::loader::load_and_validate;
use crate::context::{RunContext, date_range};
use crate::engine::{Orchestrator, RunOptions};
use crate::exec::{Connections, DefaultOperatorBackend};
use crate::pipeline::Pipeline;
use crate::report::DagRunSummary;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and graph construction
/// - warehouse connections and operators
/// - the orchestrator and its runs
/// - Ctrl-C handling (aborts every active run)
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_and_validate(&args.config)?;

    let mut pipeline = Pipeline::from_config(&cfg)?;
    pipeline.options = apply_overrides(pipeline.options, &args)?;

    let today = Utc::now().date_naive();
    let selection = args.date_selection();

    if args.dry_run {
        print_dry_run(&pipeline, &dates_for(&pipeline, selection, today));
        return Ok(());
    }

    let connections = Connections::from_config(&cfg)?;
    let backend = DefaultOperatorBackend::new(Arc::new(connections));

    let mut orchestrator = Orchestrator::new();
    let pipeline_id = pipeline.id.clone();
    orchestrator.register(pipeline, &backend)?;
    let orchestrator = Arc::new(orchestrator);

    // Ctrl-C → abort active runs; in-flight attempts are cancelled and the
    // rest of each run is skipped.
    {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            let n = orchestrator.abort_all();
            warn!(runs = n, "interrupted; aborting active DAG runs");
        });
    }

    let summaries = match selection {
        DateSelection::Single(date) => {
            vec![orchestrator.trigger_date(&pipeline_id, date).await?]
        }
        DateSelection::Range(start, end) => {
            orchestrator.trigger_range(&pipeline_id, start, end).await?
        }
        DateSelection::Scheduled => {
            orchestrator
                .trigger_scheduled(&pipeline_id, today)
                .await?
        }
    };

    if summaries.is_empty() {
        info!(pipeline = %pipeline_id, "no logical dates are due");
    }
    for summary in &summaries {
        print!("{summary}");
    }

    let failed: Vec<&DagRunSummary> = summaries.iter().filter(|s| !s.is_success()).collect();
    if !failed.is_empty() {
        let dates: Vec<String> = failed.iter().map(|s| s.date.to_string()).collect();
        anyhow::bail!(
            "{} of {} DAG run(s) did not succeed: {}",
            failed.len(),
            summaries.len(),
            dates.join(", ")
        );
    }
    Ok(())
}

fn apply_overrides(mut options: RunOptions, args: &CliArgs) -> Result<RunOptions> {
    if let Some(n) = args.concurrency {
        anyhow::ensure!(n >= 1, "--concurrency must be at least 1");
        options.concurrency_limit = n;
    }
    if let Some(n) = args.max_active_runs {
        anyhow::ensure!(n >= 1, "--max-active-runs must be at least 1");
        options.max_active_runs = n;
    }
    Ok(options)
}

fn dates_for(pipeline: &Pipeline, selection: DateSelection, today: NaiveDate) -> Vec<NaiveDate> {
    match selection {
        DateSelection::Single(d) => vec![d],
        DateSelection::Range(s, e) => date_range(s, e),
        DateSelection::Scheduled => pipeline.schedule.due_dates(today),
    }
}

/// Dry-run output: pipeline settings, tasks in execution order, and the
/// command or statement each task would run for the first selected date.
fn print_dry_run(pipeline: &Pipeline, dates: &[NaiveDate]) {
    println!("ingestdag dry-run");
    println!("  pipeline.id = {}", pipeline.id);
    println!("  concurrency = {}", pipeline.options.concurrency_limit);
    println!("  max_active_runs = {}", pipeline.options.max_active_runs);
    match (dates.first(), dates.last()) {
        (Some(first), Some(last)) if first != last => {
            println!("  dates = {first} .. {last} ({} runs)", dates.len())
        }
        (Some(first), _) => println!("  date = {first}"),
        _ => println!("  dates = (none due)"),
    }
    println!();

    let ctx = dates
        .first()
        .map(|d| RunContext::for_date(pipeline.id.clone(), *d));

    let graph = &pipeline.graph;
    println!("tasks ({}), in execution order:", graph.len());
    for task in graph.tasks() {
        println!("  - {} [{}]", task.id, task.kind);
        let upstream = graph.upstream_of(&task.id);
        if !upstream.is_empty() {
            println!("      upstream: {upstream:?}");
        }
        if let Some(ref conn) = task.connection {
            println!("      connection: {conn}");
        }
        if task.retry.retries > 0 {
            println!(
                "      retries: {} (backoff {:?}{})",
                task.retry.retries,
                task.retry.backoff,
                if task.retry.exponential { ", exponential" } else { "" }
            );
        }
        if let Some(timeout) = task.timeout {
            println!("      timeout: {timeout:?}");
        }
        match (graph.template_of(&task.id), ctx.as_ref()) {
            (Some(template), Some(ctx)) => println!("      renders: {}", template.render(ctx)),
            _ => println!("      template: {}", task.template),
        }
    }

    debug!("dry-run complete (no execution)");
}
