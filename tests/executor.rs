// tests/executor.rs
//
// Runs real processes through the production executor.
#![cfg(unix)]

mod common;
use crate::common::{init_tracing, with_timeout};

use std::error::Error;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use runmanager::dag::{Scheduler, SchedulerOptions};
use runmanager::engine::{RunManager, RuntimeOptions};
use runmanager::fs::RealFileSystem;
use runmanager::job::kind::keys;
use runmanager::job::{FileInfo, Files, JobParams, RunState, ToolInfo, ToolVersion, Tools};
use runmanager::store::MemoryJobStore;
use runmanager::types::{JobType, TreeStatus};
use runmanager_test_utils::builders::GraphBuilder;

type TestResult = Result<(), Box<dyn Error>>;

fn shell_tools() -> Tools {
    Tools::new().with(ToolInfo::new("sh", ToolVersion::any(), "/bin/sh"))
}

fn script(body: &str) -> JobParams {
    JobParams::new()
        .with(keys::TOOL, "sh")
        .with(keys::ARG, "-c")
        .with(keys::ARG, body)
}

fn local_manager(work_dir: &Path) -> RunManager {
    let scheduler = Scheduler::new(
        SchedulerOptions {
            max_workers: 2,
            paused: false,
            work_dir: work_dir.to_path_buf(),
        },
        shell_tools(),
        Arc::new(RealFileSystem),
    );
    RunManager::start_local(
        scheduler,
        Box::new(MemoryJobStore::new()),
        RuntimeOptions::default(),
    )
}

#[tokio::test]
async fn outputs_flow_from_parent_to_child_work_dir() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("model.idf");
    fs::write(&input, "Version,8.5;")?;
    let inputs: Files = [FileInfo::new(&input)].into_iter().collect();

    let (graph, names) = GraphBuilder::new()
        .job(
            "produce",
            JobType::ToolBased,
            script("cat model.idf > out.txt && echo produced"),
            inputs,
        )
        .job(
            "consume",
            JobType::ToolBased,
            script("cat out.txt > copy.txt"),
            Files::new(),
        )
        .child("produce", "consume")
        .build();
    let root = names["produce"];

    let manager = local_manager(&dir.path().join("work"));
    manager.enqueue(graph, root, false).await?;
    with_timeout(manager.wait_for_finished()).await?;
    assert_eq!(manager.tree_status(root), Some(TreeStatus::Finished));

    let produce = manager.job(root).expect("producer view");
    assert!(produce.state.stdout.contains("produced"));
    assert_eq!(produce.state.exit_code, Some(0));
    let out: Vec<_> = produce.output_files().iter().map(|f| f.filename.clone()).collect();
    // The materialized input is neither an output nor left behind.
    assert_eq!(out, vec!["out.txt".to_string()]);

    let consume = manager.job(names["consume"]).expect("consumer view");
    let copy = consume
        .output_files()
        .iter()
        .find(|f| f.filename == "copy.txt")
        .expect("copy.txt output");
    assert_eq!(fs::read_to_string(&copy.path)?, "Version,8.5;");
    assert!(produce.ran_before(&consume));

    manager.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn nonzero_exit_fails_the_job_and_its_children() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let (graph, names) = GraphBuilder::new()
        .job(
            "fail",
            JobType::ToolBased,
            script("echo boom >&2; exit 3"),
            Files::new(),
        )
        .job("after", JobType::ToolBased, script("true"), Files::new())
        .child("fail", "after")
        .build();
    let root = names["fail"];

    let manager = local_manager(dir.path());
    manager.enqueue(graph, root, false).await?;
    with_timeout(manager.wait_for_finished()).await?;

    let failed = manager.job(root).expect("failed view");
    assert_eq!(failed.run_state, RunState::Failed);
    assert_eq!(failed.state.exit_code, Some(3));
    assert!(failed.state.stderr.contains("boom"));
    assert!(failed.errors().errors().any(|e| e.contains("code 3")));

    let after = manager.job(names["after"]).expect("child view");
    assert_eq!(after.run_state, RunState::Failed);
    assert!(after.last_run().is_none());
    assert_eq!(manager.tree_status(root), Some(TreeStatus::Failed));

    manager.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn stopping_a_running_process_cancels_it() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let (graph, names) = GraphBuilder::new()
        .job("sleep", JobType::ToolBased, script("sleep 30"), Files::new())
        .build();
    let id = names["sleep"];

    let manager = local_manager(dir.path());
    manager.enqueue(graph, id, false).await?;

    with_timeout(async {
        while manager.job(id).map(|j| j.run_state) != Some(RunState::Running) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    manager.request_stop(id).await?;
    let snapshot = with_timeout(manager.wait_for_finished()).await?;
    assert_eq!(snapshot.tree(id).map(|t| t.status), Some(TreeStatus::Canceled));

    manager.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn split_job_writes_chunks_into_its_work_dir() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("cases.txt");
    fs::write(&input, "1\n2\n3\n")?;
    let inputs: Files = [FileInfo::new(&input)].into_iter().collect();

    let params = JobParams::new().with(keys::NUM_SPLITS, "2");
    let (graph, names) = GraphBuilder::new()
        .job("split", JobType::ParallelSplit, params, inputs)
        .job("count", JobType::ToolBased, script("cat cases-1.txt cases-2.txt > all.txt"), Files::new())
        .child("split", "count")
        .build();
    let root = names["split"];

    let manager = local_manager(&dir.path().join("work"));
    manager.enqueue(graph, root, false).await?;
    with_timeout(manager.wait_for_finished()).await?;
    assert_eq!(manager.tree_status(root), Some(TreeStatus::Finished));

    let split = manager.job(root).expect("split view");
    let chunks: Vec<_> = split.output_files().iter().map(|f| f.filename.clone()).collect();
    assert_eq!(chunks, vec!["cases-1.txt".to_string(), "cases-2.txt".to_string()]);

    let count = manager.job(names["count"]).expect("count view");
    let all = count
        .output_files()
        .iter()
        .find(|f| f.filename == "all.txt")
        .expect("all.txt output");
    assert_eq!(fs::read_to_string(&all.path)?, "1\n2\n3\n");

    manager.shutdown().await?;
    Ok(())
}
