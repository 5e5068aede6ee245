// tests/out_of_date.rs

mod common;
use crate::common::{drive, init_tracing, scheduler_with};

use std::collections::HashSet;
use std::path::PathBuf;

use runmanager::dag::{OutOfDateReason, Scheduler, SchedulerStep};
use runmanager::engine::{JobOutcome, JobReport};
use runmanager::fs::mock::MockFileSystem;
use runmanager::job::{FileInfo, Files, RunState, Tools};
use runmanager::types::{JobId, TreeStatus};
use runmanager_test_utils::builders::GraphBuilder;

const INPUT: &str = "/data/in.txt";

fn input_files() -> Files {
    [FileInfo::new(INPUT)].into_iter().collect()
}

/// One tool job reading `/data/in.txt`, run once to completion.
fn single_job_run(fs: &MockFileSystem) -> (Scheduler, JobId) {
    fs.add_file(INPUT, "alpha");
    let mut scheduler = scheduler_with(1, fs);
    let (graph, names) = GraphBuilder::new()
        .tool("sim", "sim", input_files(), Tools::new())
        .build();
    let id = names["sim"];

    let step = scheduler.enqueue(graph, id, false).unwrap();
    assert_eq!(step.dispatched.len(), 1);
    drive(&mut scheduler, step, &HashSet::new());
    assert_eq!(scheduler.tree_status(id), Some(TreeStatus::Finished));
    (scheduler, id)
}

fn reason(scheduler: &Scheduler, id: JobId) -> Option<OutOfDateReason> {
    scheduler.job(id).and_then(|j| j.rerun_reason().cloned())
}

/// Complete every dispatched job, reporting `outputs` for `producer`.
fn drive_with_outputs(
    scheduler: &mut Scheduler,
    first: SchedulerStep,
    producer: JobId,
    outputs: &Files,
) {
    let mut pending: Vec<JobId> = first.dispatched.iter().map(|d| d.id).collect();
    while let Some(id) = pending.pop() {
        scheduler.handle_started(id);
        let report = JobReport {
            exit_code: Some(0),
            outputs: if id == producer { outputs.clone() } else { Files::new() },
            ..JobReport::default()
        };
        let step = scheduler.handle_completion(id, JobOutcome::Succeeded(report));
        pending.extend(step.dispatched.iter().map(|d| d.id));
    }
}

#[test]
fn first_run_is_never_run_and_records_input_checksums() {
    init_tracing();
    let fs = MockFileSystem::new();
    let (scheduler, id) = single_job_run(&fs);

    let job = scheduler.job(id).unwrap();
    assert_eq!(reason(&scheduler, id), Some(OutOfDateReason::NeverRun));
    assert_eq!(job.state().tracked_files.len(), 1);
    assert_eq!(job.state().tracked_files[0].path, PathBuf::from(INPUT));
    assert_eq!(job.state().tracked_files[0].size, 5);
}

#[test]
fn unchanged_inputs_do_not_rerun() {
    init_tracing();
    let fs = MockFileSystem::new();
    let (mut scheduler, id) = single_job_run(&fs);
    let before = scheduler.job(id).unwrap().last_run();

    let step = scheduler.requeue(id, false).unwrap();

    assert!(step.dispatched.is_empty());
    assert_eq!(step.settled_trees, vec![id]);
    assert_eq!(scheduler.job(id).unwrap().last_run(), before);
    assert_eq!(scheduler.tree_status(id), Some(TreeStatus::Finished));
}

#[test]
fn touching_an_input_without_changing_it_does_not_rerun() {
    init_tracing();
    let fs = MockFileSystem::new();
    let (mut scheduler, id) = single_job_run(&fs);

    fs.touch(INPUT);
    let step = scheduler.requeue(id, false).unwrap();

    assert!(step.dispatched.is_empty());
    assert_eq!(scheduler.job(id).unwrap().run_state(), RunState::Succeeded);
}

#[test]
fn changed_input_contents_rerun_with_checksum_mismatch() {
    init_tracing();
    let fs = MockFileSystem::new();
    let (mut scheduler, id) = single_job_run(&fs);

    // Same size, different bytes.
    fs.add_file(INPUT, "omega");
    let step = scheduler.requeue(id, false).unwrap();

    assert_eq!(step.dispatched.len(), 1);
    assert_eq!(
        reason(&scheduler, id),
        Some(OutOfDateReason::ChecksumMismatch(PathBuf::from(INPUT)))
    );

    let old = scheduler.job(id).unwrap().state().tracked_files[0].checksum.clone();
    drive(&mut scheduler, step, &HashSet::new());
    let new = &scheduler.job(id).unwrap().state().tracked_files[0].checksum;
    assert_ne!(&old, new);
}

#[test]
fn removed_input_fails_the_job_before_start() {
    init_tracing();
    let fs = MockFileSystem::new();
    let (mut scheduler, id) = single_job_run(&fs);

    fs.remove_file(INPUT);
    let step = scheduler.requeue(id, false).unwrap();

    assert!(step.dispatched.is_empty());
    assert_eq!(step.newly_failed, vec![id]);
    let job = scheduler.job(id).unwrap();
    assert_eq!(job.run_state(), RunState::Failed);
    assert!(job.errors().errors().any(|e| e.contains("Required input file missing")));
    assert_eq!(scheduler.tree_status(id), Some(TreeStatus::Failed));
}

#[test]
fn forced_requeue_reruns_up_to_date_job() {
    init_tracing();
    let fs = MockFileSystem::new();
    let (mut scheduler, id) = single_job_run(&fs);
    let before = scheduler.job(id).unwrap().last_run();

    let step = scheduler.requeue(id, true).unwrap();
    assert_eq!(step.dispatched.len(), 1);
    assert_eq!(reason(&scheduler, id), Some(OutOfDateReason::Forced));

    drive(&mut scheduler, step, &HashSet::new());
    assert!(scheduler.job(id).unwrap().last_run() > before);
}

#[test]
fn failed_previous_run_is_retried() {
    init_tracing();
    let fs = MockFileSystem::new();
    fs.add_file(INPUT, "alpha");
    let mut scheduler = scheduler_with(1, &fs);
    let (graph, names) = GraphBuilder::new()
        .tool("sim", "sim", input_files(), Tools::new())
        .build();
    let id = names["sim"];

    let failing: HashSet<JobId> = [id].into_iter().collect();
    let step = scheduler.enqueue(graph, id, false).unwrap();
    drive(&mut scheduler, step, &failing);
    assert_eq!(scheduler.tree_status(id), Some(TreeStatus::Failed));

    let step = scheduler.requeue(id, false).unwrap();
    assert_eq!(step.dispatched.len(), 1);
    assert_eq!(reason(&scheduler, id), Some(OutOfDateReason::PreviousRunFailed));
}

#[test]
fn child_reruns_when_parent_ran_again_and_parent_reruns_when_output_vanishes() {
    init_tracing();
    let fs = MockFileSystem::new();
    fs.add_file(INPUT, "alpha");
    let output = "/work/parent/out.dat";
    fs.add_file(output, "result");
    let outputs: Files = [FileInfo::new(output)].into_iter().collect();

    let mut scheduler = scheduler_with(2, &fs);
    let (graph, names) = GraphBuilder::new()
        .tool("parent", "sim", input_files(), Tools::new())
        .tool("child", "sim", Files::new(), Tools::new())
        .child("parent", "child")
        .build();
    let (parent, child) = (names["parent"], names["child"]);

    let step = scheduler.enqueue(graph, parent, false).unwrap();
    drive_with_outputs(&mut scheduler, step, parent, &outputs);
    assert_eq!(scheduler.tree_status(parent), Some(TreeStatus::Finished));

    // The child consumed the parent's output.
    let child_tracks = &scheduler.job(child).unwrap().state().tracked_files;
    assert!(child_tracks.iter().any(|t| t.path == PathBuf::from(output)));

    // A changed parent input reruns the parent, which makes the child stale.
    fs.add_file(INPUT, "gamma");
    let step = scheduler.requeue(parent, false).unwrap();
    assert_eq!(step.dispatched.iter().map(|d| d.id).collect::<Vec<_>>(), vec![parent]);
    drive_with_outputs(&mut scheduler, step, parent, &outputs);
    assert_eq!(reason(&scheduler, child), Some(OutOfDateReason::UpstreamNewer));
    assert!(scheduler.job(parent).unwrap().ran_before(scheduler.job(child).unwrap()));

    // A vanished output makes the producer stale.
    fs.remove_file(output);
    let step = scheduler.requeue(parent, false).unwrap();
    assert_eq!(step.dispatched.len(), 1);
    assert_eq!(reason(&scheduler, parent), Some(OutOfDateReason::OutputsMissing));
}
