// src/dag/dispatch.rs

//! Work descriptions handed from the scheduler to the executor.

use std::path::PathBuf;

use crate::job::files::Files;
use crate::types::{JobId, JobType};

/// What the executor must do with the job's working directory before the
/// process starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrepareStep {
    /// Copy a file or directory into the working directory (`to` is relative).
    Copy { from: PathBuf, to: PathBuf },
    /// Expand `<include href="..."/>` directives of `source` into `to`.
    MergeXml {
        source: PathBuf,
        include_dir: Option<PathBuf>,
        to: PathBuf,
    },
}

/// External process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub prepare: Vec<PrepareStep>,
}

/// In-process fan-out of one input into `outputs.len()` chunk files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitSpec {
    pub input: PathBuf,
    /// Absolute output paths, in chunk order.
    pub outputs: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Launch {
    /// Nothing to execute; the job succeeds immediately.
    Noop,
    Process(ProcessSpec),
    Split(SplitSpec),
}

/// Temp-file disposal after a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupPolicy {
    KeepAll,
    /// Remove the inputs that were copied into the working directory.
    RemoveMaterializedInputs,
}

/// A job the scheduler wants the executor to run now.
#[derive(Debug, Clone)]
pub struct DispatchedJob {
    pub id: JobId,
    pub kind: JobType,
    pub description: String,
    /// Per-job working directory, never shared between running jobs.
    pub work_dir: PathBuf,
    pub inputs: Files,
    pub launch: Launch,
    pub cleanup: CleanupPolicy,
}
