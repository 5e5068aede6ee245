// tests/job_run_order.rs

mod common;
use crate::common::{drive, init_tracing, scheduler_with, with_timeout};

use std::collections::{BTreeMap, HashSet};
use std::error::Error;

use runmanager::dag::{JobGraph, Scheduler};
use runmanager::engine::{RunManager, RuntimeOptions};
use runmanager::fs::mock::MockFileSystem;
use runmanager::job::{Files, RunState, Tools};
use runmanager::store::MemoryJobStore;
use runmanager::types::{JobId, TreeStatus};
use runmanager_test_utils::builders::GraphBuilder;
use runmanager_test_utils::fake_executor::{ExecutionLog, FakeExecutor};

type TestResult = Result<(), Box<dyn Error>>;

fn tool(b: GraphBuilder, name: &str) -> GraphBuilder {
    b.tool(name, "sim", Files::new(), Tools::new())
}

/// `head` with three 5-node chains below it, and a shared 2-node finished
/// chain joined on the first node of every chain.
fn three_chains_with_shared_finished() -> (JobGraph, BTreeMap<String, JobId>) {
    let mut b = GraphBuilder::new().null("head");
    for chain in ["a", "b", "c"] {
        let names: Vec<String> = (1..=5).map(|i| format!("{chain}{i}")).collect();
        for name in &names {
            b = tool(b, name);
        }
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        b = b.child("head", refs[0]).chain(&refs);
    }
    b = tool(tool(b, "finished1"), "finished2").child("finished1", "finished2");
    for first in ["a1", "b1", "c1"] {
        b = b.finished(first, "finished1");
    }
    b.build()
}

/// `headfailed` with one 5-node chain whose fourth job names a tool that is
/// not registered, and a 5-node finished chain on the head.
fn failing_chain() -> (JobGraph, BTreeMap<String, JobId>) {
    let mut b = GraphBuilder::new().null("headfailed");
    for i in 1..=5 {
        let name = format!("failed{i}");
        b = if i == 4 {
            b.tool(&name, "ruby", Files::new(), Tools::new())
        } else {
            tool(b, &name)
        };
    }
    for i in 1..=5 {
        b = tool(b, &format!("finished{i}"));
    }
    b.child("headfailed", "failed1")
        .chain(&["failed1", "failed2", "failed3", "failed4", "failed5"])
        .chain(&["finished1", "finished2", "finished3", "finished4", "finished5"])
        .finished("headfailed", "finished1")
        .build()
}

fn state_of(s: &Scheduler, names: &BTreeMap<String, JobId>, name: &str) -> RunState {
    s.job(names[name]).map(|j| j.run_state()).unwrap()
}

fn ran_before(s: &Scheduler, names: &BTreeMap<String, JobId>, first: &str, second: &str) -> bool {
    let a = s.job(names[first]).unwrap();
    let b = s.job(names[second]).unwrap();
    a.ran_before(b)
}

#[test]
fn three_chains_and_shared_finished_chain_all_succeed() {
    init_tracing();
    let fs = MockFileSystem::new();
    let mut scheduler = scheduler_with(4, &fs);
    let (graph, names) = three_chains_with_shared_finished();
    let root = names["head"];

    let step = scheduler.enqueue(graph, root, false).unwrap();
    drive(&mut scheduler, step, &HashSet::new());

    for name in names.keys() {
        assert_eq!(state_of(&scheduler, &names, name), RunState::Succeeded, "{name}");
    }
    assert_eq!(scheduler.tree_status(root), Some(TreeStatus::Finished));

    for chain in ["a", "b", "c"] {
        assert!(ran_before(&scheduler, &names, "head", &format!("{chain}1")));
        for i in 1..5 {
            assert!(ran_before(
                &scheduler,
                &names,
                &format!("{chain}{i}"),
                &format!("{chain}{}", i + 1)
            ));
        }
        // The join waits for the whole of every branch.
        assert!(ran_before(&scheduler, &names, &format!("{chain}5"), "finished1"));
    }
    assert!(ran_before(&scheduler, &names, "finished1", "finished2"));

    let finished2 = scheduler.job(names["finished2"]).unwrap().last_run();
    assert!(finished2.is_some());
    assert_eq!(scheduler.tree_last_run(root), finished2);
}

#[test]
fn job_without_tool_fails_its_chain_and_finished_subtree() {
    init_tracing();
    let fs = MockFileSystem::new();
    let mut scheduler = scheduler_with(2, &fs);
    let (graph, names) = failing_chain();
    let root = names["headfailed"];

    let step = scheduler.enqueue(graph, root, false).unwrap();
    let completed = drive(&mut scheduler, step, &HashSet::new());

    assert_eq!(
        completed,
        vec![names["failed1"], names["failed2"], names["failed3"]]
    );
    assert_eq!(state_of(&scheduler, &names, "headfailed"), RunState::Succeeded);
    for name in ["failed1", "failed2", "failed3"] {
        assert_eq!(state_of(&scheduler, &names, name), RunState::Succeeded);
    }

    // Unknown tool: failed before start, with a recorded (failed) run.
    let failed4 = scheduler.job(names["failed4"]).unwrap();
    assert_eq!(failed4.run_state(), RunState::Failed);
    assert!(failed4.last_run().is_some());
    assert!(!failed4.errors().succeeded());
    assert!(failed4.errors().errors().any(|e| e.contains("ruby")));
    assert!(ran_before(&scheduler, &names, "failed3", "failed4"));

    let failed5 = scheduler.job(names["failed5"]).unwrap();
    assert_eq!(failed5.run_state(), RunState::Failed);
    assert!(failed5.last_run().is_none());

    for i in 1..=5 {
        let job = scheduler.job(names[&format!("finished{i}")]).unwrap();
        assert!(job.last_run().is_none(), "finished{i} must never run");
        assert!(job.run_state().is_terminal());
    }

    assert_eq!(scheduler.tree_status(root), Some(TreeStatus::Failed));
    assert_eq!(scheduler.tree_last_run(root), None);
    assert!(scheduler.tree_settled(root));
}

#[test]
fn reenqueue_of_finished_tree_dispatches_nothing() {
    init_tracing();
    let fs = MockFileSystem::new();
    let mut scheduler = scheduler_with(4, &fs);
    let (graph, names) = three_chains_with_shared_finished();
    let root = names["head"];

    let step = scheduler.enqueue(graph, root, false).unwrap();
    drive(&mut scheduler, step, &HashSet::new());
    let last_run = scheduler.tree_last_run(root);

    let again = scheduler.requeue(root, false).unwrap();
    assert!(again.dispatched.is_empty());
    assert_eq!(scheduler.tree_status(root), Some(TreeStatus::Finished));
    assert_eq!(scheduler.tree_last_run(root), last_run);

    let forced = scheduler.requeue(root, true).unwrap();
    assert!(!forced.dispatched.is_empty());
}

#[test]
fn failed_middle_job_blocks_only_its_dependents() {
    init_tracing();
    let fs = MockFileSystem::new();
    let mut scheduler = scheduler_with(4, &fs);
    let (graph, names) = three_chains_with_shared_finished();
    let root = names["head"];

    let step = scheduler.enqueue(graph, root, false).unwrap();
    let failing: HashSet<JobId> = [names["b3"]].into_iter().collect();
    drive(&mut scheduler, step, &failing);

    assert_eq!(state_of(&scheduler, &names, "b3"), RunState::Failed);
    assert_eq!(state_of(&scheduler, &names, "b4"), RunState::Failed);
    assert!(scheduler.job(names["b4"]).unwrap().last_run().is_none());
    for name in ["a5", "c5"] {
        assert_eq!(state_of(&scheduler, &names, name), RunState::Succeeded);
    }
    assert!(scheduler.job(names["finished1"]).unwrap().last_run().is_none());
    assert_eq!(scheduler.tree_status(root), Some(TreeStatus::Failed));
    assert_eq!(scheduler.tree_last_run(root), None);
}

#[tokio::test]
async fn run_manager_runs_chains_through_executor() -> TestResult {
    init_tracing();
    let fs = MockFileSystem::new();
    let (graph, names) = three_chains_with_shared_finished();
    let root = names["head"];

    let log = ExecutionLog::new();
    let exec_log = log.clone();
    let manager = RunManager::start(
        scheduler_with(3, &fs),
        Box::new(MemoryJobStore::new()),
        RuntimeOptions::default(),
        move |tx| FakeExecutor::new(tx, exec_log),
    );

    manager.enqueue(graph, root, false).await?;
    let snapshot = with_timeout(manager.wait_for_finished()).await?;

    assert_eq!(snapshot.tree(root).map(|t| t.status), Some(TreeStatus::Finished));
    assert_eq!(manager.tree_status(root), Some(TreeStatus::Finished));
    // 15 chain jobs and 2 finished jobs; the null head completes in place.
    assert_eq!(log.dispatched().len(), 17);

    let dispatched = log.dispatched();
    let position = |name: &str| dispatched.iter().position(|id| *id == names[name]).unwrap();
    for last in ["a5", "b5", "c5"] {
        assert!(position(last) < position("finished1"));
    }

    let finished2 = manager.job(names["finished2"]).unwrap();
    assert_eq!(manager.tree_last_run(root), finished2.last_run());

    manager.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn run_manager_reports_failed_tree_and_settles() -> TestResult {
    init_tracing();
    let fs = MockFileSystem::new();
    let (graph, names) = failing_chain();
    let root = names["headfailed"];

    let log = ExecutionLog::new();
    let exec_log = log.clone();
    let manager = RunManager::start(
        scheduler_with(2, &fs),
        Box::new(MemoryJobStore::new()),
        RuntimeOptions::default(),
        move |tx| FakeExecutor::new(tx, exec_log),
    );

    manager.enqueue(graph, root, false).await?;
    assert!(manager.wait_for_finished_timeout(std::time::Duration::from_secs(5)).await?);

    assert_eq!(manager.tree_status(root), Some(TreeStatus::Failed));
    assert_eq!(manager.tree_last_run(root), None);
    assert!(!log.dispatched().contains(&names["failed4"]));
    assert!(manager.job(names["failed4"]).unwrap().last_run().is_some());

    manager.shutdown().await?;
    Ok(())
}
