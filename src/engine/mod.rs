// src/engine/mod.rs

//! Orchestration engine.
//!
//! This module ties together:
//! - the job scheduler (readiness, out-of-date checks, worker slots)
//! - the executor backend that runs dispatched jobs
//! - the job store that persists finished runs
//! - the main runtime event loop that reacts to:
//!   - enqueue / requeue / dequeue requests
//!   - pause, resume and stop requests
//!   - job start and completion events
//!   - shutdown signals
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`]; [`manager`] is the handle callers use.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use crate::dag::outdated::OutOfDateReason;
use crate::dag::JobGraph;
use crate::errors::Result;
use crate::job::{Files, JobErrors, JobState, RunState};
use crate::types::{JobId, JobType, TreeStatus};

/// What a finished process left behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobReport {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Files found in the working directory after the run.
    pub outputs: Files,
    /// Warnings on success, errors on failure.
    pub messages: Vec<String>,
}

impl JobReport {
    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            messages: vec![message.into()],
            ..Self::default()
        }
    }
}

/// Outcome of a dispatched job for the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded(JobReport),
    Failed(JobReport),
    Canceled,
}

/// Runtime options used by both the core and the async shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeOptions {
    /// If true, exit the runtime once every enqueued tree is settled.
    pub exit_when_settled: bool,
}

/// Events flowing into the runtime from callers and the executor.
#[derive(Debug)]
pub enum RuntimeEvent {
    /// Move a job tree into the manager and schedule it.
    Enqueue {
        graph: JobGraph,
        root: JobId,
        force: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Enqueue several trees in one step, so `exit_when_settled` only
    /// looks at the queue once all of them are in.
    EnqueueAll {
        trees: Vec<(JobGraph, JobId)>,
        force: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Schedule an already enqueued tree again.
    Requeue {
        root: JobId,
        force: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Take a tree back out of the manager.
    Dequeue {
        root: JobId,
        reply: oneshot::Sender<Result<JobGraph>>,
    },
    SetPaused(bool),
    /// Stop a job: kill it if running, cancel it if still waiting.
    RequestStop(JobId),
    /// The executor started the job's process.
    JobStarted { job: JobId },
    /// A dispatched job reached a terminal outcome.
    JobCompleted { job: JobId, outcome: JobOutcome },
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

/// Read-only view of one job, as published to observers.
#[derive(Debug, Clone, PartialEq)]
pub struct JobView {
    pub id: JobId,
    pub kind: JobType,
    pub description: String,
    pub run_state: RunState,
    pub state: JobState,
    pub rerun_reason: Option<OutOfDateReason>,
    pub parent: Option<JobId>,
    pub children: Vec<JobId>,
    pub finished_job: Option<JobId>,
}

impl JobView {
    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.state.last_run
    }

    pub fn errors(&self) -> &JobErrors {
        &self.state.errors
    }

    pub fn output_files(&self) -> &Files {
        &self.state.output_files
    }

    pub fn ran_before(&self, other: &JobView) -> bool {
        self.state.ran_before(&other.state)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TreeSnapshot {
    pub root: JobId,
    pub status: TreeStatus,
    pub last_run: Option<DateTime<Utc>>,
    /// Every job of the tree is terminal.
    pub settled: bool,
}

/// Scheduler state published after every runtime step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSnapshot {
    pub trees: Vec<TreeSnapshot>,
    pub jobs: HashMap<JobId, JobView>,
    pub paused: bool,
    pub in_flight: usize,
    /// The runtime loop has exited.
    pub stopped: bool,
}

impl RunSnapshot {
    pub fn tree(&self, root: JobId) -> Option<&TreeSnapshot> {
        self.trees.iter().find(|t| t.root == root)
    }

    pub fn all_settled(&self) -> bool {
        self.trees.iter().all(|t| t.settled)
    }
}

pub mod core;
pub mod event_handlers;
pub mod manager;
pub mod runtime;

pub use core::CoreRuntime;
pub use event_handlers::{CoreCommand, CoreStep};
pub use manager::RunManager;
pub use runtime::Runtime;
