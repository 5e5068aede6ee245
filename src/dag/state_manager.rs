// src/dag/state_manager.rs

//! Per-job run state transitions and dependency queries over a
//! [`JobGraph`] arena.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::dag::graph::JobGraph;
use crate::job::{Files, JobErrors, JobState, RunState};
use crate::types::JobId;

/// How a job's dependencies currently stand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepsStatus {
    /// Every dependency succeeded.
    Satisfied,
    /// Some dependency has not finished yet.
    Waiting,
    /// A dependency failed; the job can never run in this pass.
    FailedUpstream(JobId),
    /// A dependency was canceled.
    CanceledUpstream(JobId),
}

/// Manages run state transitions for the jobs of one arena.
pub struct StateManager<'a> {
    graph: &'a mut JobGraph,
}

impl<'a> StateManager<'a> {
    pub fn new(graph: &'a mut JobGraph) -> Self {
        Self { graph }
    }

    /// Put every job of the tree back into `Queued`.
    pub fn mark_tree_queued(&mut self, root: JobId, force: bool) -> Vec<JobId> {
        let members = self.graph.tree_members(root);
        for id in &members {
            if let Some(job) = self.graph.get_mut(*id) {
                job.run_state = RunState::Queued;
                job.force = force;
                job.rerun_reason = None;
                job.pending_tracks.clear();
                job.pending_inputs = Files::new();
            }
        }
        debug!(tree = %root, jobs = members.len(), force, "marked tree Queued");
        members
    }

    /// Mark a job that will never run because of `cause`.
    ///
    /// Its recorded run is replaced: a blocked job has no valid last run.
    pub fn mark_blocked(&mut self, id: JobId, run_state: RunState, cause: JobId) {
        let verb = if run_state == RunState::Canceled {
            "canceled"
        } else {
            "failed"
        };
        if let Some(job) = self.graph.get_mut(id) {
            job.run_state = run_state;
            job.state = JobState {
                errors: JobErrors::failed(format!("not run: upstream job {cause} {verb}")),
                ..JobState::never_run()
            };
            job.pending_tracks.clear();
            debug!(job = %id, upstream = %cause, state = ?run_state, "dependent blocked by upstream");
        }
    }

    /// Mark a waiting or running job canceled, dropping its recorded run.
    pub fn mark_canceled(&mut self, id: JobId) {
        if let Some(job) = self.graph.get_mut(id) {
            job.run_state = RunState::Canceled;
            job.state = JobState {
                errors: JobErrors::failed("canceled"),
                ..JobState::never_run()
            };
            job.pending_tracks.clear();
        }
    }

    /// Fail a job before it was ever launched (missing input, unknown tool).
    pub fn mark_failed_before_start(&mut self, id: JobId, message: String, stamp: DateTime<Utc>) {
        if let Some(job) = self.graph.get_mut(id) {
            job.run_state = RunState::Failed;
            job.state = JobState {
                last_run: Some(stamp),
                errors: JobErrors::failed(message),
                ..JobState::never_run()
            };
            job.pending_tracks.clear();
        }
    }

    /// Read-only view over the same arena.
    pub fn view(&self) -> ReadOnlyStateManager<'_> {
        ReadOnlyStateManager::new(&*self.graph)
    }
}

/// A read-only view for dependency queries.
///
/// Used where the scheduler only has shared access (status queries,
/// snapshots).
pub struct ReadOnlyStateManager<'a> {
    graph: &'a JobGraph,
}

impl<'a> ReadOnlyStateManager<'a> {
    pub fn new(graph: &'a JobGraph) -> Self {
        Self { graph }
    }

    /// Determine whether every dependency of `id` has succeeded.
    ///
    /// Failure wins over cancellation, which wins over waiting.
    pub fn deps_status(&self, id: JobId) -> DepsStatus {
        let mut status = DepsStatus::Satisfied;
        for dep in self.graph.dependencies(id) {
            let Some(job) = self.graph.get(dep) else {
                return DepsStatus::Waiting;
            };
            match job.run_state {
                RunState::Succeeded => {}
                RunState::Failed => return DepsStatus::FailedUpstream(dep),
                RunState::Canceled => {
                    if !matches!(status, DepsStatus::CanceledUpstream(_)) {
                        status = DepsStatus::CanceledUpstream(dep);
                    }
                }
                _ => {
                    if status == DepsStatus::Satisfied {
                        status = DepsStatus::Waiting;
                    }
                }
            }
        }
        status
    }

    /// Most recent `last_run` among the dependencies of `id`.
    pub fn upstream_last_run(&self, id: JobId) -> Option<DateTime<Utc>> {
        self.graph
            .dependencies(id)
            .into_iter()
            .filter_map(|dep| self.graph.get(dep).and_then(|j| j.last_run()))
            .max()
    }

    /// The job's own input files followed by the outputs of its
    /// dependencies.
    pub fn gather_inputs(&self, id: JobId) -> Files {
        let mut files = Files::new();
        let Some(job) = self.graph.get(id) else {
            return files;
        };
        files.extend(job.input_files());
        for dep in self.graph.dependencies(id) {
            if let Some(upstream) = self.graph.get(dep) {
                files.extend(upstream.output_files());
            }
        }
        files
    }

    /// Whether every job of the tree is terminal.
    pub fn tree_terminal(&self, root: JobId) -> bool {
        self.graph
            .tree_members(root)
            .into_iter()
            .filter_map(|id| self.graph.get(id))
            .all(|j| j.run_state.is_terminal())
    }
}

/// Completion timestamp for a job whose dependencies last ran at
/// `upstream`: never earlier than (and never equal to) any of them.
pub fn completion_stamp(now: DateTime<Utc>, upstream: Option<DateTime<Utc>>) -> DateTime<Utc> {
    match upstream {
        Some(up) if up >= now => up + Duration::microseconds(1),
        _ => now,
    }
}
