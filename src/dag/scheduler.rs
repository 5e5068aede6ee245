// src/dag/scheduler.rs

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::checksum::compute_aggregate_hash;
use crate::dag::dispatch::{DispatchedJob, Launch};
use crate::dag::graph::JobGraph;
use crate::dag::outdated;
use crate::dag::scheduler_step::{SchedulerStep, StopAction};
use crate::dag::state_manager::{completion_stamp, DepsStatus, ReadOnlyStateManager, StateManager};
use crate::engine::{JobOutcome, JobReport, JobView, RunSnapshot, TreeSnapshot};
use crate::errors::{Result, RunManagerError};
use crate::fs::FileSystem;
use crate::job::kind::StartContext;
use crate::job::{Files, Job, JobErrors, JobState, RunState, Tools};
use crate::store::JobRecord;
use crate::types::{JobId, TreeStatus};

/// Settings of the worker pool and the working directory layout.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Maximum number of jobs in flight at once (>= 1).
    pub max_workers: usize,
    /// Start with the queue paused.
    pub paused: bool,
    /// Jobs without an explicit `out_dir` run in `<work_dir>/<job id>`.
    pub work_dir: PathBuf,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        let max_workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            max_workers,
            paused: false,
            work_dir: std::env::temp_dir().join("runmanager"),
        }
    }
}

/// Scheduler owns the job arena of every enqueued tree plus the queue of
/// eligible jobs.
///
/// It is responsible for:
/// - deciding when a queued job's dependencies are satisfied
/// - skipping jobs whose recorded run is still up to date
/// - failing or canceling dependents of failed or canceled jobs
/// - handing eligible jobs to the executor while worker slots are free
/// - recording completed runs
///
/// It is pure and synchronous; the engine drives it from a single task.
#[derive(Debug)]
pub struct Scheduler {
    graph: JobGraph,
    trees: Vec<JobId>,
    eligible: VecDeque<JobId>,
    in_flight: HashSet<JobId>,
    options: SchedulerOptions,
    tools: Tools,
    fs: Arc<dyn FileSystem>,
}

impl Scheduler {
    pub fn new(options: SchedulerOptions, tools: Tools, fs: Arc<dyn FileSystem>) -> Self {
        let options = SchedulerOptions {
            max_workers: options.max_workers.max(1),
            ..options
        };
        Self {
            graph: JobGraph::new(),
            trees: Vec::new(),
            eligible: VecDeque::new(),
            in_flight: HashSet::new(),
            options,
            tools,
            fs,
        }
    }

    pub fn options(&self) -> &SchedulerOptions {
        &self.options
    }

    pub fn is_paused(&self) -> bool {
        self.options.paused
    }

    /// Number of dispatched or running jobs.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Ids of dispatched or running jobs, sorted.
    pub fn in_flight_jobs(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.in_flight.iter().copied().collect();
        ids.sort();
        ids
    }

    /// Roots of the enqueued trees, in enqueue order.
    pub fn trees(&self) -> &[JobId] {
        &self.trees
    }

    pub fn graph(&self) -> &JobGraph {
        &self.graph
    }

    pub fn job(&self, id: JobId) -> Option<&Job> {
        self.graph.get(id)
    }

    /// Move the tree rooted at `root` out of `graph` and schedule it.
    ///
    /// Jobs of `graph` that are not part of that tree are dropped.
    ///
    /// A tree that hangs below, or joins on, a job outside of it is rejected
    /// with `AttachConflict`: its jobs could never see that job complete.
    pub fn enqueue(&mut self, mut graph: JobGraph, root: JobId, force: bool) -> Result<SchedulerStep> {
        if let Some((member, outside)) = graph.outside_attachment(root) {
            return Err(RunManagerError::AttachConflict(format!(
                "job {member} of tree {root} depends on job {outside} outside the tree"
            )));
        }
        let tree = graph.extract_tree(root)?;
        let ids = tree.ids().to_vec();
        self.graph.absorb(tree)?;
        self.trees.push(root);

        info!(tree = %root, jobs = ids.len(), force, "enqueued job tree");

        let mut step = self.tracked_step(Some(root), |s| {
            StateManager::new(&mut s.graph).mark_tree_queued(root, force);
            SchedulerStep {
                changed: ids,
                ..SchedulerStep::default()
            }
        });
        step.changed.dedup();
        Ok(step)
    }

    /// Schedule an enqueued tree again, e.g. after its inputs changed.
    pub fn requeue(&mut self, root: JobId, force: bool) -> Result<SchedulerStep> {
        self.ensure_idle_tree(root)?;
        info!(tree = %root, force, "requeued job tree");

        Ok(self.tracked_step(Some(root), |s| {
            let members: HashSet<JobId> = s.graph.tree_members(root).into_iter().collect();
            s.eligible.retain(|id| !members.contains(id));
            let changed = StateManager::new(&mut s.graph).mark_tree_queued(root, force);
            SchedulerStep {
                changed,
                ..SchedulerStep::default()
            }
        }))
    }

    /// Take a tree out of the scheduler. Its jobs return to `Idle`.
    pub fn dequeue(&mut self, root: JobId) -> Result<JobGraph> {
        self.ensure_idle_tree(root)?;

        let mut tree = self.graph.extract_tree(root)?;
        let members: HashSet<JobId> = tree.ids().iter().copied().collect();
        self.eligible.retain(|id| !members.contains(id));
        self.trees.retain(|r| *r != root);

        for id in tree.ids().to_vec() {
            if let Some(job) = tree.get_mut(id) {
                job.run_state = RunState::Idle;
                job.force = false;
                job.pending_tracks.clear();
                job.pending_inputs = Files::new();
            }
        }

        info!(tree = %root, jobs = members.len(), "dequeued job tree");
        Ok(tree)
    }

    fn ensure_idle_tree(&self, root: JobId) -> Result<()> {
        if !self.trees.contains(&root) {
            return Err(RunManagerError::JobNotFound(root));
        }
        let busy = self
            .graph
            .tree_members(root)
            .iter()
            .any(|id| self.in_flight.contains(id));
        if busy {
            return Err(RunManagerError::TreeBusy(root));
        }
        Ok(())
    }

    pub fn set_paused(&mut self, paused: bool) -> SchedulerStep {
        if self.options.paused != paused {
            info!(paused, "queue pause state changed");
        }
        self.options.paused = paused;
        self.tracked_step(None, |_| SchedulerStep::default())
    }

    /// Stop a job.
    ///
    /// A job in flight keeps its state until the executor reports it
    /// canceled; a waiting job is canceled right away, and so are its
    /// dependents.
    pub fn request_stop(&mut self, id: JobId) -> Result<(StopAction, SchedulerStep)> {
        let run_state = self
            .graph
            .get(id)
            .ok_or(RunManagerError::JobNotFound(id))?
            .run_state;

        match run_state {
            RunState::Dispatched | RunState::Running => {
                info!(job = %id, "stop requested for job in flight");
                Ok((StopAction::KillInFlight, SchedulerStep::default()))
            }
            RunState::Queued | RunState::Eligible => {
                info!(job = %id, "stop requested for waiting job; canceling");
                let step = self.tracked_step(None, |s| {
                    s.eligible.retain(|e| *e != id);
                    StateManager::new(&mut s.graph).mark_canceled(id);
                    SchedulerStep {
                        changed: vec![id],
                        ..SchedulerStep::default()
                    }
                });
                Ok((StopAction::CanceledWaiting, step))
            }
            RunState::Succeeded | RunState::Failed | RunState::Canceled => {
                debug!(job = %id, "stop requested for finished job; nothing to do");
                Ok((StopAction::AlreadyTerminal, SchedulerStep::default()))
            }
            RunState::Idle => Ok((StopAction::NotEnqueued, SchedulerStep::default())),
        }
    }

    /// The executor started the job's process.
    pub fn handle_started(&mut self, id: JobId) -> SchedulerStep {
        match self.graph.get_mut(id) {
            Some(job) if job.run_state == RunState::Dispatched => {
                job.run_state = RunState::Running;
                debug!(job = %id, "job running");
                SchedulerStep {
                    changed: vec![id],
                    ..SchedulerStep::default()
                }
            }
            Some(job) => {
                debug!(job = %id, state = ?job.run_state, "start report for job not dispatched; ignoring");
                SchedulerStep::default()
            }
            None => {
                warn!(job = %id, "start report for unknown job; ignoring");
                SchedulerStep::default()
            }
        }
    }

    /// Record the outcome of a dispatched job and schedule what it unblocks.
    pub fn handle_completion(&mut self, id: JobId, outcome: JobOutcome) -> SchedulerStep {
        if !self.in_flight.remove(&id) {
            warn!(job = %id, "completion for job not in flight; ignoring");
            return SchedulerStep::default();
        }

        self.tracked_step(None, |s| {
            let mut step = SchedulerStep {
                changed: vec![id],
                ..SchedulerStep::default()
            };
            match outcome {
                JobOutcome::Succeeded(report) => s.record_success(id, report),
                JobOutcome::Failed(report) => {
                    s.record_failure(id, report);
                    step.newly_failed.push(id);
                }
                JobOutcome::Canceled => {
                    info!(job = %id, "job canceled");
                    StateManager::new(&mut s.graph).mark_canceled(id);
                }
            }
            step
        })
    }

    /// Run `f`, then the readiness pass, and report trees that settled.
    ///
    /// `reopened` is a tree `f` puts back into the queue; it counts as
    /// unsettled before the step.
    fn tracked_step(
        &mut self,
        reopened: Option<JobId>,
        f: impl FnOnce(&mut Self) -> SchedulerStep,
    ) -> SchedulerStep {
        let settled_before: HashSet<JobId> = self
            .trees
            .iter()
            .copied()
            .filter(|r| Some(*r) != reopened && self.tree_settled(*r))
            .collect();

        let mut step = f(self);
        step.merge(self.collect_ready());

        for root in self.trees.clone() {
            if !settled_before.contains(&root) && self.tree_settled(root) {
                let status = self.tree_status(root).unwrap_or(TreeStatus::Idle);
                info!(tree = %root, status = %status, "job tree settled");
                step.settled_trees.push(root);
            }
        }
        step
    }

    /// Readiness fixpoint.
    ///
    /// Resolves every queued job whose dependencies are decided, then hands
    /// eligible jobs to free worker slots, until nothing changes.
    pub fn collect_ready(&mut self) -> SchedulerStep {
        let mut step = SchedulerStep::default();
        loop {
            let mut progressed = self.resolve_queued(&mut step);
            progressed |= self.dispatch_eligible(&mut step);
            if !progressed {
                break;
            }
        }
        step
    }

    fn resolve_queued(&mut self, step: &mut SchedulerStep) -> bool {
        let queued: Vec<JobId> = self
            .trees
            .iter()
            .flat_map(|r| self.graph.tree_members(*r))
            .filter(|id| {
                self.graph
                    .get(*id)
                    .is_some_and(|j| j.run_state == RunState::Queued)
            })
            .collect();

        let mut progressed = false;
        for id in queued {
            let status = ReadOnlyStateManager::new(&self.graph).deps_status(id);
            match status {
                DepsStatus::Waiting => continue,
                DepsStatus::FailedUpstream(cause) => {
                    StateManager::new(&mut self.graph).mark_blocked(id, RunState::Failed, cause);
                    step.newly_failed.push(id);
                }
                DepsStatus::CanceledUpstream(cause) => {
                    StateManager::new(&mut self.graph).mark_blocked(id, RunState::Canceled, cause);
                }
                DepsStatus::Satisfied => self.evaluate(id),
            }
            if self.graph.get(id).is_some_and(|j| j.run_state == RunState::Failed) {
                if !step.newly_failed.contains(&id) {
                    step.newly_failed.push(id);
                }
            }
            step.changed.push(id);
            progressed = true;
        }
        progressed
    }

    /// Decide what a job with satisfied dependencies does next.
    fn evaluate(&mut self, id: JobId) {
        let view = ReadOnlyStateManager::new(&self.graph);
        let inputs = view.gather_inputs(id);
        let upstream = view.upstream_last_run(id);

        let Some(job) = self.graph.get(id) else {
            return;
        };
        let decision = outdated::check(job, &inputs, upstream, job.force, self.fs.as_ref());

        match decision {
            Ok(None) => {
                debug!(job = %id, "job up to date; skipping");
                if let Some(job) = self.graph.get_mut(id) {
                    job.run_state = RunState::Succeeded;
                }
            }
            Ok(Some(reason)) => {
                info!(job = %id, reason = %reason, "job out of date; eligible to run");
                if let Some(job) = self.graph.get_mut(id) {
                    job.rerun_reason = Some(reason);
                    job.pending_inputs = inputs;
                    job.run_state = RunState::Eligible;
                }
                self.eligible.push_back(id);
            }
            Err(err) => {
                warn!(job = %id, error = %err, "job cannot run");
                let stamp = completion_stamp(Utc::now(), upstream);
                StateManager::new(&mut self.graph).mark_failed_before_start(id, err.to_string(), stamp);
            }
        }
    }

    fn dispatch_eligible(&mut self, step: &mut SchedulerStep) -> bool {
        let mut progressed = false;

        while !self.options.paused && self.in_flight.len() < self.options.max_workers {
            let Some(id) = self.eligible.pop_front() else {
                break;
            };
            if !self.graph.get(id).is_some_and(|j| j.run_state == RunState::Eligible) {
                continue;
            }
            progressed = true;
            step.changed.push(id);

            match self.prepare_dispatch(id) {
                Ok(dispatched) if matches!(dispatched.launch, Launch::Noop) => {
                    debug!(job = %id, "nothing to launch; completing in place");
                    self.record_success(id, JobReport::default());
                }
                Ok(dispatched) => {
                    info!(
                        job = %id,
                        kind = %dispatched.kind,
                        description = %dispatched.description,
                        work_dir = ?dispatched.work_dir,
                        "dispatching job"
                    );
                    if let Some(job) = self.graph.get_mut(id) {
                        job.run_state = RunState::Dispatched;
                    }
                    self.in_flight.insert(id);
                    step.dispatched.push(dispatched);
                }
                Err(err) => {
                    warn!(job = %id, error = %err, "job failed to start");
                    let upstream = ReadOnlyStateManager::new(&self.graph).upstream_last_run(id);
                    let stamp = completion_stamp(Utc::now(), upstream);
                    StateManager::new(&mut self.graph).mark_failed_before_start(id, err.to_string(), stamp);
                    step.newly_failed.push(id);
                }
            }
        }

        progressed
    }

    fn prepare_dispatch(&mut self, id: JobId) -> Result<DispatchedJob> {
        let job = self.graph.get(id).ok_or(RunManagerError::JobNotFound(id))?;

        let work_dir = job
            .out_dir()
            .cloned()
            .unwrap_or_else(|| self.options.work_dir.join(id.to_string()));
        let tools = job.tools().merged(&self.tools);
        let ctx = StartContext {
            job,
            inputs: &job.pending_inputs,
            work_dir: &work_dir,
            tools: &tools,
        };
        let launch = job.handler().start_handler(&ctx)?;
        let tracks = outdated::capture_tracks(&job.pending_inputs, self.fs.as_ref())?;

        let fingerprint =
            compute_aggregate_hash(&tracks.iter().map(|t| t.checksum.clone()).collect::<Vec<_>>());
        debug!(job = %id, inputs = tracks.len(), fingerprint = %fingerprint, "captured input checksums");

        let dispatched = DispatchedJob {
            id,
            kind: job.kind(),
            description: job.description(),
            work_dir,
            inputs: job.pending_inputs.clone(),
            launch,
            cleanup: job.handler().cleanup(),
        };

        if let Some(job) = self.graph.get_mut(id) {
            job.pending_tracks = tracks;
        }
        Ok(dispatched)
    }

    fn record_success(&mut self, id: JobId, report: JobReport) {
        let upstream = ReadOnlyStateManager::new(&self.graph).upstream_last_run(id);
        let stamp = completion_stamp(Utc::now(), upstream);

        let Some(job) = self.graph.get_mut(id) else {
            return;
        };
        let mut errors = JobErrors::success();
        for message in report.messages {
            errors.add_warning(message);
        }
        let output_files = job.handler().output_files(&report.outputs, &job.pending_inputs);
        job.state = JobState {
            last_run: Some(stamp),
            errors,
            output_files,
            tracked_files: std::mem::take(&mut job.pending_tracks),
            exit_code: report.exit_code,
            stdout: report.stdout,
            stderr: report.stderr,
        };
        job.run_state = RunState::Succeeded;
        info!(job = %id, last_run = %stamp, outputs = job.state.output_files.len(), "job succeeded");
    }

    fn record_failure(&mut self, id: JobId, report: JobReport) {
        let upstream = ReadOnlyStateManager::new(&self.graph).upstream_last_run(id);
        let stamp = completion_stamp(Utc::now(), upstream);

        let Some(job) = self.graph.get_mut(id) else {
            return;
        };
        let mut errors = JobErrors::success();
        for message in report.messages {
            errors.add_error(message);
        }
        if errors.succeeded() {
            errors.add_error(match report.exit_code {
                Some(code) => format!("process exited with code {code}"),
                None => "process failed".to_string(),
            });
        }
        job.state = JobState {
            last_run: Some(stamp),
            errors,
            output_files: Files::new(),
            tracked_files: Vec::new(),
            exit_code: report.exit_code,
            stdout: report.stdout,
            stderr: report.stderr,
        };
        job.pending_tracks.clear();
        job.run_state = RunState::Failed;
        warn!(job = %id, exit_code = ?report.exit_code, "job failed; failing dependents");
    }

    /// Aggregate status of an enqueued tree.
    pub fn tree_status(&self, root: JobId) -> Option<TreeStatus> {
        if !self.trees.contains(&root) {
            return None;
        }
        let states: Vec<RunState> = self
            .graph
            .tree_members(root)
            .into_iter()
            .filter_map(|id| self.graph.get(id).map(|j| j.run_state))
            .collect();
        Some(status_of(&states))
    }

    /// Most recent `last_run` in the tree, only once it has Finished.
    pub fn tree_last_run(&self, root: JobId) -> Option<DateTime<Utc>> {
        if self.tree_status(root)? != TreeStatus::Finished {
            return None;
        }
        self.graph
            .tree_members(root)
            .into_iter()
            .filter_map(|id| self.graph.get(id).and_then(|j| j.last_run()))
            .max()
    }

    /// Every job of the tree reached a terminal state.
    pub fn tree_settled(&self, root: JobId) -> bool {
        self.trees.contains(&root) && ReadOnlyStateManager::new(&self.graph).tree_terminal(root)
    }

    pub fn all_settled(&self) -> bool {
        self.trees.iter().all(|r| self.tree_settled(*r))
    }

    /// Persistable record of a job.
    pub fn record(&self, id: JobId) -> Option<JobRecord> {
        self.graph.get(id).map(JobRecord::from_job)
    }

    pub fn job_view(&self, id: JobId) -> Option<JobView> {
        self.graph.get(id).map(view_of)
    }

    pub fn snapshot(&self) -> RunSnapshot {
        let trees = self
            .trees
            .iter()
            .map(|root| TreeSnapshot {
                root: *root,
                status: self.tree_status(*root).unwrap_or(TreeStatus::Idle),
                last_run: self.tree_last_run(*root),
                settled: self.tree_settled(*root),
            })
            .collect();
        let jobs = self.graph.iter().map(|j| (j.id(), view_of(j))).collect();

        RunSnapshot {
            trees,
            jobs,
            paused: self.options.paused,
            in_flight: self.in_flight.len(),
            stopped: false,
        }
    }
}

fn view_of(job: &Job) -> JobView {
    JobView {
        id: job.id(),
        kind: job.kind(),
        description: job.description(),
        run_state: job.run_state(),
        state: job.state().clone(),
        rerun_reason: job.rerun_reason().cloned(),
        parent: job.parent(),
        children: job.children().to_vec(),
        finished_job: job.finished_job(),
    }
}

fn status_of(states: &[RunState]) -> TreeStatus {
    let any = |s: RunState| states.contains(&s);
    let made_progress = states.iter().any(|s| s.is_terminal());

    if any(RunState::Failed) {
        TreeStatus::Failed
    } else if any(RunState::Canceled) {
        TreeStatus::Canceled
    } else if states.iter().all(|s| *s == RunState::Succeeded) {
        TreeStatus::Finished
    } else if any(RunState::Running) {
        TreeStatus::Running
    } else if any(RunState::Dispatched) || any(RunState::Eligible) {
        if made_progress {
            TreeStatus::Running
        } else {
            TreeStatus::Starting
        }
    } else if any(RunState::Queued) && made_progress {
        TreeStatus::Running
    } else {
        TreeStatus::Idle
    }
}
