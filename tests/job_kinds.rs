// tests/job_kinds.rs
//
// Launch descriptions the scheduler hands out for each job kind.

mod common;
use crate::common::{init_tracing, options};

use std::path::PathBuf;
use std::sync::Arc;

use runmanager::dag::{CleanupPolicy, DispatchedJob, JobGraph, Launch, PrepareStep, ProcessSpec, Scheduler};
use runmanager::fs::mock::MockFileSystem;
use runmanager::job::kind::keys;
use runmanager::job::{FileInfo, Files, Job, JobFactory, JobParams, RunState, ToolInfo, ToolVersion, Tools};
use runmanager::types::{JobId, TreeStatus};

fn version(v: &str) -> ToolVersion {
    v.parse().unwrap()
}

fn installed() -> Tools {
    Tools::new()
        .with(ToolInfo::new("xmlpreprocessor", version("1.0.0"), "/opt/xmlpp/bin/xmlpp"))
        .with(ToolInfo::new("dakota", version("6.1.0"), "/opt/dakota-6.1/bin/dakota"))
        .with(ToolInfo::new("dakota", version("6.4.0"), "/opt/dakota-6.4/bin/dakota"))
        .with(ToolInfo::new("energyplus", version("8.5.0"), "/opt/ep/energyplus"))
}

fn scheduler(fs: &MockFileSystem) -> Scheduler {
    Scheduler::new(options(2), installed(), Arc::new(fs.clone()))
}

/// Enqueue a single-job tree and return what was dispatched.
fn dispatch_one(scheduler: &mut Scheduler, job: Job) -> (JobId, Vec<DispatchedJob>) {
    let mut graph = JobGraph::new();
    let id = graph.insert(job);
    let step = scheduler.enqueue(graph, id, false).unwrap();
    (id, step.dispatched)
}

fn process(dispatched: &DispatchedJob) -> &ProcessSpec {
    match &dispatched.launch {
        Launch::Process(spec) => spec,
        other => panic!("expected a process launch, got {other:?}"),
    }
}

#[test]
fn xml_job_merges_includes_into_in_xml() {
    init_tracing();
    let fs = MockFileSystem::new();
    fs.add_file("/model/in/building.xml", "<building/>");
    fs.add_file("/model/weather.epw", "LOCATION");

    let mut xml = FileInfo::new("/model/in/building.xml");
    xml.add_required_file("/model/weather.epw", "weather.epw");
    let files: Files = [xml].into_iter().collect();

    let mut scheduler = scheduler(&fs);
    let job = JobFactory::new().create_xml_job(files, Tools::new());
    let (id, dispatched) = dispatch_one(&mut scheduler, job);

    assert_eq!(dispatched.len(), 1);
    assert_eq!(dispatched[0].work_dir, PathBuf::from("/work").join(id.to_string()));
    assert_eq!(dispatched[0].cleanup, CleanupPolicy::KeepAll);

    let spec = process(&dispatched[0]);
    assert_eq!(spec.program, PathBuf::from("/opt/xmlpp/bin/xmlpp"));
    assert_eq!(spec.args, vec!["in.xml".to_string()]);
    assert!(spec.env.is_empty());
    assert_eq!(
        spec.prepare,
        vec![
            PrepareStep::MergeXml {
                source: PathBuf::from("/model/in/building.xml"),
                include_dir: Some(PathBuf::from("/model/in/include")),
                to: PathBuf::from("in.xml"),
            },
            PrepareStep::Copy {
                from: PathBuf::from("/model/weather.epw"),
                to: PathBuf::from("weather.epw"),
            },
        ]
    );
}

#[test]
fn xml_job_without_xml_input_fails_before_start() {
    init_tracing();
    let fs = MockFileSystem::new();
    fs.add_file("/model/notes.txt", "no xml here");
    let files: Files = [FileInfo::new("/model/notes.txt")].into_iter().collect();

    let mut scheduler = scheduler(&fs);
    let job = JobFactory::new().create_xml_job(files, Tools::new());
    let (id, dispatched) = dispatch_one(&mut scheduler, job);

    assert!(dispatched.is_empty());
    let job = scheduler.job(id).unwrap();
    assert_eq!(job.run_state(), RunState::Failed);
    assert!(job.errors().errors().any(|e| e.contains("type 'xml'")));
}

#[test]
fn dakota_job_resolves_driver_and_exports_nested_tools() {
    init_tracing();
    let fs = MockFileSystem::new();
    fs.add_file("/study/case.in", "method");

    let files: Files = [FileInfo::new("/study/case.in")].into_iter().collect();
    let params = JobParams::new()
        .with(keys::DAKOTA_VERSION, "6.1")
        .with(keys::NESTED_TOOL, "energyplus@8.5")
        // Duplicate requirements collapse into one.
        .with(keys::NESTED_TOOL, "energyplus@8.5")
        .with(keys::ARG, "-pre_run");

    let mut scheduler = scheduler(&fs);
    let job = JobFactory::new().create_dakota_job(params, files, Tools::new());
    let reqs = job.handler().tool_requirements(&job).unwrap();
    assert_eq!(reqs.len(), 2);
    let (_, dispatched) = dispatch_one(&mut scheduler, job);

    assert_eq!(dispatched.len(), 1);
    let spec = process(&dispatched[0]);
    assert_eq!(spec.program, PathBuf::from("/opt/dakota-6.1/bin/dakota"));
    assert_eq!(
        spec.args,
        vec!["-i", "case.in", "-o", "dakota.out", "-pre_run"]
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>()
    );
    assert_eq!(
        spec.env,
        vec![(
            "RUNMANAGER_TOOL_ENERGYPLUS".to_string(),
            "/opt/ep/energyplus".to_string()
        )]
    );
    assert_eq!(
        spec.prepare,
        vec![PrepareStep::Copy {
            from: PathBuf::from("/study/case.in"),
            to: PathBuf::from("case.in"),
        }]
    );
}

#[test]
fn dakota_job_picks_newest_driver_without_version() {
    let fs = MockFileSystem::new();
    fs.add_file("/study/case.in", "method");
    let files: Files = [FileInfo::new("/study/case.in")].into_iter().collect();

    let mut scheduler = scheduler(&fs);
    let job = JobFactory::new().create_dakota_job(JobParams::new(), files, Tools::new());
    let (_, dispatched) = dispatch_one(&mut scheduler, job);

    let spec = process(&dispatched[0]);
    assert_eq!(spec.program, PathBuf::from("/opt/dakota-6.4/bin/dakota"));
    assert!(spec.env.is_empty());
}

#[test]
fn dakota_job_with_missing_nested_tool_fails_its_tree() {
    init_tracing();
    let fs = MockFileSystem::new();
    fs.add_file("/study/case.in", "method");
    let files: Files = [FileInfo::new("/study/case.in")].into_iter().collect();
    let params = JobParams::new()
        .with(keys::NESTED_TOOL, "energyplus@8.5")
        .with(keys::NESTED_TOOL, "radiance@5");

    let mut scheduler = scheduler(&fs);
    let job = JobFactory::new().create_dakota_job(params, files, Tools::new());
    let mut graph = JobGraph::new();
    let id = graph.insert(job);
    let step = scheduler.enqueue(graph, id, false).unwrap();

    assert!(step.dispatched.is_empty());
    assert_eq!(step.newly_failed, vec![id]);
    assert_eq!(step.settled_trees, vec![id]);

    let job = scheduler.job(id).unwrap();
    assert_eq!(job.run_state(), RunState::Failed);
    assert!(job.last_run().is_some());
    assert!(job
        .errors()
        .errors()
        .any(|e| e.contains("Tool not found: radiance (version 5)")));
    assert_eq!(scheduler.tree_status(id), Some(TreeStatus::Failed));
}

#[test]
fn job_tools_take_part_in_resolution() {
    let fs = MockFileSystem::new();
    fs.add_file("/study/case.in", "method");
    let files: Files = [FileInfo::new("/study/case.in")].into_iter().collect();
    let own = Tools::new().with(ToolInfo::new("radiance", version("5.0.0"), "/home/me/radiance"));
    let params = JobParams::new().with(keys::NESTED_TOOL, "radiance@5");

    let mut scheduler = scheduler(&fs);
    let job = JobFactory::new().create_dakota_job(params, files, own);
    let (_, dispatched) = dispatch_one(&mut scheduler, job);

    let spec = process(&dispatched[0]);
    assert_eq!(
        spec.env,
        vec![(
            "RUNMANAGER_TOOL_RADIANCE".to_string(),
            "/home/me/radiance".to_string()
        )]
    );
}

#[test]
fn split_job_names_chunks_in_its_work_dir() {
    let fs = MockFileSystem::new();
    fs.add_file("/data/cases.csv", "1\n2\n3\n");
    let files: Files = [FileInfo::new("/data/cases.csv")].into_iter().collect();

    let mut scheduler = scheduler(&fs);
    let job = JobFactory::new().create_split_job(3, files);
    let (id, dispatched) = dispatch_one(&mut scheduler, job);

    let work = PathBuf::from("/work").join(id.to_string());
    match &dispatched[0].launch {
        Launch::Split(spec) => {
            assert_eq!(spec.input, PathBuf::from("/data/cases.csv"));
            assert_eq!(
                spec.outputs,
                vec![
                    work.join("cases-1.csv"),
                    work.join("cases-2.csv"),
                    work.join("cases-3.csv"),
                ]
            );
        }
        other => panic!("expected a split launch, got {other:?}"),
    }
}
