// src/job/mod.rs

//! Job nodes: identity, parameters, input files, kind handler, edges and
//! run state.
//!
//! - [`files`] holds typed input/output file descriptors.
//! - [`params`] is the ordered parameter bag.
//! - [`state`] is the persisted snapshot of a job's last run.
//! - [`tools`] resolves tool names and versions to executables.
//! - [`kind`] defines the per-kind capability interface.
//! - [`factory`] creates jobs from a kind tag.

pub mod factory;
pub mod files;
pub mod kind;
pub mod params;
pub mod state;
pub mod tools;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dag::outdated::OutOfDateReason;
use crate::types::{JobId, JobType};

pub use factory::JobFactory;
pub use files::{FileInfo, Files};
pub use kind::JobHandler;
pub use params::JobParams;
pub use state::{ErrorLevel, FileTrack, JobErrors, JobState};
pub use tools::{ToolInfo, ToolResolver, ToolVersion, Tools};

/// Scheduler-side state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    /// Not enqueued.
    Idle,
    /// Enqueued, waiting on dependencies.
    Queued,
    /// Dependencies satisfied and out of date; waiting for a worker slot.
    Eligible,
    /// Handed to the executor.
    Dispatched,
    /// The executor reported that the job started.
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Succeeded | RunState::Failed | RunState::Canceled
        )
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, RunState::Dispatched | RunState::Running)
    }
}

/// A single schedulable unit of work.
///
/// Edges are stored as id lists; a job is owned by exactly one
/// [`crate::dag::JobGraph`] arena at a time.
#[derive(Clone)]
pub struct Job {
    id: JobId,
    handler: Arc<dyn JobHandler>,
    params: JobParams,
    input_files: Files,
    tools: Tools,
    out_dir: Option<PathBuf>,

    pub(crate) children: Vec<JobId>,
    pub(crate) finished_job: Option<JobId>,
    pub(crate) parent: Option<JobId>,
    pub(crate) finished_parents: Vec<JobId>,

    pub(crate) run_state: RunState,
    pub(crate) state: JobState,
    pub(crate) force: bool,
    /// Tracks captured at dispatch; become `state.tracked_files` on success.
    pub(crate) pending_tracks: Vec<FileTrack>,
    pub(crate) pending_inputs: Files,
    pub(crate) rerun_reason: Option<OutOfDateReason>,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("kind", &self.handler.job_type())
            .field("run_state", &self.run_state)
            .field("children", &self.children)
            .field("finished_job", &self.finished_job)
            .finish_non_exhaustive()
    }
}

impl Job {
    pub(crate) fn new(
        id: JobId,
        handler: Arc<dyn JobHandler>,
        params: JobParams,
        input_files: Files,
        tools: Tools,
    ) -> Self {
        Self {
            id,
            handler,
            params,
            input_files,
            tools,
            out_dir: None,
            children: Vec::new(),
            finished_job: None,
            parent: None,
            finished_parents: Vec::new(),
            run_state: RunState::Idle,
            state: JobState::never_run(),
            force: false,
            pending_tracks: Vec::new(),
            pending_inputs: Files::new(),
            rerun_reason: None,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn kind(&self) -> JobType {
        self.handler.job_type()
    }

    pub fn handler(&self) -> &Arc<dyn JobHandler> {
        &self.handler
    }

    pub fn params(&self) -> &JobParams {
        &self.params
    }

    pub fn input_files(&self) -> &Files {
        &self.input_files
    }

    pub fn tools(&self) -> &Tools {
        &self.tools
    }

    pub fn out_dir(&self) -> Option<&PathBuf> {
        self.out_dir.as_ref()
    }

    /// Override the working directory this job runs in.
    pub fn set_out_dir(&mut self, dir: impl Into<PathBuf>) {
        self.out_dir = Some(dir.into());
    }

    pub fn description(&self) -> String {
        self.handler.description(self)
    }

    pub fn children(&self) -> &[JobId] {
        &self.children
    }

    pub fn finished_job(&self) -> Option<JobId> {
        self.finished_job
    }

    pub fn parent(&self) -> Option<JobId> {
        self.parent
    }

    /// Nodes this job is attached to as their finished job.
    pub fn finished_parents(&self) -> &[JobId] {
        &self.finished_parents
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    /// Seed the job with a previously persisted run snapshot.
    pub fn restore_state(&mut self, state: JobState) {
        self.state = state;
    }

    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.state.last_run
    }

    pub fn errors(&self) -> &JobErrors {
        &self.state.errors
    }

    pub fn output_files(&self) -> &Files {
        &self.state.output_files
    }

    pub fn ran_before(&self, other: &Job) -> bool {
        self.state.ran_before(&other.state)
    }

    /// Why the job was last found out of date, if it was.
    pub fn rerun_reason(&self) -> Option<&OutOfDateReason> {
        self.rerun_reason.as_ref()
    }
}
