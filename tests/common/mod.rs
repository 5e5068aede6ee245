#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use runmanager::dag::{Scheduler, SchedulerOptions, SchedulerStep};
use runmanager::fs::mock::MockFileSystem;
use runmanager::job::{ToolInfo, ToolVersion, Tools};
use runmanager::types::JobId;
use runmanager_test_utils::fake_executor::fake_outcome;

pub use runmanager_test_utils::{init_tracing, with_timeout};

/// Registry with one fake simulation tool, `sim`.
pub fn sim_tools() -> Tools {
    Tools::new().with(ToolInfo::new(
        "sim",
        "1.0.0".parse::<ToolVersion>().unwrap(),
        "/opt/sim/bin/sim",
    ))
}

pub fn options(max_workers: usize) -> SchedulerOptions {
    SchedulerOptions {
        max_workers,
        paused: false,
        work_dir: PathBuf::from("/work"),
    }
}

pub fn scheduler_with(max_workers: usize, fs: &MockFileSystem) -> Scheduler {
    Scheduler::new(options(max_workers), sim_tools(), Arc::new(fs.clone()))
}

/// Play executor for a pure scheduler: start and complete dispatched jobs
/// in FIFO order until nothing is in flight.
///
/// Returns the jobs in the order they completed.
pub fn drive(scheduler: &mut Scheduler, first: SchedulerStep, failing: &HashSet<JobId>) -> Vec<JobId> {
    let mut pending: VecDeque<JobId> = first.dispatched.iter().map(|d| d.id).collect();
    let mut completed = Vec::new();

    while let Some(id) = pending.pop_front() {
        scheduler.handle_started(id);
        let step = scheduler.handle_completion(id, fake_outcome(failing.contains(&id)));
        completed.push(id);
        pending.extend(step.dispatched.iter().map(|d| d.id));
    }
    completed
}
