// src/lib.rs

pub mod checksum;
pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod job;
pub mod logging;
pub mod store;
pub mod types;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::{load_and_validate, workflow_root_dir, WorkflowGraph};
use crate::dag::{JobGraph, Scheduler};
use crate::engine::{RunManager, RunSnapshot, RuntimeEvent, RuntimeOptions};
use crate::fs::RealFileSystem;
use crate::job::JobFactory;
use crate::store::{open_store, restore_graphs, JobStore};
use crate::types::{JobId, TreeStatus};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - workflow loading and validation
/// - the state store (restoring previous runs)
/// - scheduler, runtime and process executor
/// - Ctrl-C handling
///
/// Returns `true` when every job tree finished successfully.
pub async fn run(args: CliArgs) -> Result<bool> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;
    let base = workflow_root_dir(&config_path);

    let factory = JobFactory::new();
    let workflow = config::build_graph(&cfg, &factory, &base)?;

    if args.dry_run {
        print_dry_run(&workflow);
        return Ok(true);
    }

    let state_path = config::state_path(&cfg, &base);
    let mut store = open_store(cfg.manager.state_store, &state_path)?;

    let trees = if args.resume {
        let records = store.load_all()?;
        info!(jobs = records.len(), path = %state_path.display(), "resuming persisted job trees");
        restore_graphs(&records, &factory)?
    } else {
        workflow_trees(workflow.graph.clone(), &workflow.roots, store.as_mut())?
    };

    let mut options = config::scheduler_options(&cfg, &base);
    if let Some(n) = args.max_workers {
        options.max_workers = usize::from(n);
    }
    options.paused |= args.paused;
    let paused = options.paused;

    let tools = config::tool_registry(&cfg, &base)?;
    let scheduler = Scheduler::new(options, tools, Arc::new(RealFileSystem));
    let manager = RunManager::start_local(
        scheduler,
        store,
        RuntimeOptions {
            exit_when_settled: true,
        },
    );

    // Ctrl-C → graceful shutdown.
    {
        let tx = manager.event_sender();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            info!("Ctrl+C received; stopping running jobs");
            let _ = tx.send(RuntimeEvent::ShutdownRequested).await;
        });
    }

    manager.enqueue_all(trees, args.force).await?;
    if paused {
        info!("queue is paused; nothing will run until the process is stopped");
    }

    // The runtime exits by itself once every tree settled (or after Ctrl-C).
    let snapshot = manager.wait_for_finished().await?;
    manager.join().await?;

    print_summary(&snapshot, &workflow.names);
    Ok(snapshot
        .trees
        .iter()
        .all(|t| t.status == TreeStatus::Finished))
}

/// Split the workflow into one arena per root and seed every job with the
/// state persisted for it.
fn workflow_trees(
    mut graph: JobGraph,
    roots: &[JobId],
    store: &mut dyn JobStore,
) -> Result<Vec<(JobGraph, JobId)>> {
    for id in graph.ids().to_vec() {
        let Some(record) = store.load_job(id)? else {
            continue;
        };
        if let Some(job) = graph.get_mut(id) {
            if job.kind() == record.kind {
                debug!(job = %id, last_run = ?record.state.last_run, "restored job state");
                job.restore_state(record.state);
            } else {
                // A kind change invalidates the stored run.
                warn!(job = %id, "stored job has a different kind; ignoring its state");
                store.remove_job(id)?;
            }
        }
    }

    roots
        .iter()
        .map(|root| Ok((graph.extract_tree(*root)?, *root)))
        .collect()
}

fn display_name(names: &BTreeMap<String, JobId>, id: JobId) -> String {
    names
        .iter()
        .find(|(_, v)| **v == id)
        .map(|(k, _)| k.clone())
        .unwrap_or_else(|| id.to_string())
}

fn print_summary(snapshot: &RunSnapshot, names: &BTreeMap<String, JobId>) {
    println!("runmanager summary");
    for tree in &snapshot.trees {
        let last_run = tree
            .last_run
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {}: {} (last run {})",
            display_name(names, tree.root),
            tree.status,
            last_run
        );
    }

    let mut failed: Vec<_> = snapshot
        .jobs
        .values()
        .filter(|j| !j.errors().succeeded() && j.last_run().is_some())
        .collect();
    failed.sort_by_key(|j| j.id);
    for job in failed {
        println!("  failed job {}:", display_name(names, job.id));
        for message in job.errors().errors() {
            println!("      {message}");
        }
    }
}

/// Dry-run output: print each tree with its edges.
fn print_dry_run(workflow: &WorkflowGraph) {
    println!("runmanager dry-run");
    println!("trees ({}):", workflow.roots.len());

    for root in &workflow.roots {
        print_job(workflow, *root, 1, "");
    }

    debug!("dry-run complete (no execution)");
}

fn print_job(workflow: &WorkflowGraph, id: JobId, depth: usize, edge: &str) {
    let Some(job) = workflow.graph.get(id) else {
        return;
    };
    let name = workflow.name_of(id);
    println!(
        "{}- {edge}{name} [{}] {}",
        "  ".repeat(depth),
        job.kind(),
        job.description()
    );
    for child in job.children() {
        print_job(workflow, *child, depth + 1, "");
    }
    if let Some(finished) = job.finished_job() {
        print_job(workflow, finished, depth + 1, "finished: ");
    }
}
