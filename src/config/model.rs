// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::types::{JobType, StoreMode};

/// Workflow file exactly as read from TOML, before validation.
///
/// ```toml
/// [manager]
/// max_workers = 4
/// work_dir = "run"
/// state_store = "sqlite"
///
/// [[tool]]
/// name = "energyplus"
/// version = "8.5.0"
/// path = "/usr/local/bin/energyplus"
///
/// [job.head]
/// kind = "null"
/// children = ["sim"]
/// finished = "report"
///
/// [job.sim]
/// kind = "tool"
/// tool = "energyplus"
/// version = "8.5"
/// args = ["-w", "in.epw", "in.idf"]
/// files = [{ path = "model/in.idf", type = "idf" }]
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RawWorkflowFile {
    #[serde(default)]
    pub manager: ManagerSection,

    /// Registered tools from `[[tool]]`.
    #[serde(default, rename = "tool")]
    pub tools: Vec<ToolSection>,

    /// All jobs from `[job.<name>]`, keyed by job name.
    #[serde(default)]
    pub job: BTreeMap<String, JobSection>,
}

/// Validated workflow. Built from [`RawWorkflowFile`] via `TryFrom`.
#[derive(Debug, Clone)]
pub struct WorkflowFile {
    pub manager: ManagerSection,
    pub tools: Vec<ToolSection>,
    pub job: BTreeMap<String, JobSection>,
}

impl WorkflowFile {
    pub(crate) fn new_unchecked(
        manager: ManagerSection,
        tools: Vec<ToolSection>,
        job: BTreeMap<String, JobSection>,
    ) -> Self {
        Self { manager, tools, job }
    }
}

/// `[manager]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ManagerSection {
    /// Worker pool size; defaults to the number of CPUs.
    #[serde(default)]
    pub max_workers: Option<usize>,

    #[serde(default)]
    pub paused: bool,

    /// Parent of the per-job working directories, relative to the workflow
    /// file.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    #[serde(default)]
    pub state_store: StoreMode,

    /// Location of the state file or database, relative to the workflow
    /// file.
    #[serde(default)]
    pub state_path: Option<PathBuf>,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("run")
}

impl Default for ManagerSection {
    fn default() -> Self {
        Self {
            max_workers: None,
            paused: false,
            work_dir: default_work_dir(),
            state_store: StoreMode::default(),
            state_path: None,
        }
    }
}

/// `[[tool]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolSection {
    pub name: String,
    /// Empty means unversioned.
    #[serde(default)]
    pub version: String,
    pub path: PathBuf,
}

/// `[job.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct JobSection {
    pub kind: JobType,

    /// Jobs that run after this one succeeds.
    #[serde(default)]
    pub children: Vec<String>,

    /// Job that runs after this job and everything below it succeeded.
    #[serde(default)]
    pub finished: Option<String>,

    /// Executable name for `tool` jobs.
    #[serde(default)]
    pub tool: Option<String>,

    /// Version constraint on `tool`, e.g. `"8.5"`.
    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub files: Vec<FileSection>,

    /// Free-form parameters, in order.
    #[serde(default)]
    pub params: Vec<ParamSection>,

    /// Number of chunks for `split` jobs.
    #[serde(default)]
    pub numsplits: Option<usize>,

    /// Numbering offset of `split` chunk names.
    #[serde(default)]
    pub offset: Option<usize>,

    #[serde(default)]
    pub description: Option<String>,

    /// Run here instead of below `[manager].work_dir`.
    #[serde(default)]
    pub out_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileSection {
    pub path: PathBuf,
    /// Type tag; defaults to the file extension.
    #[serde(default, rename = "type")]
    pub type_tag: Option<String>,
    #[serde(default)]
    pub required: Vec<RequiredSection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequiredSection {
    pub source: PathBuf,
    pub target: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParamSection {
    pub key: String,
    pub value: String,
}
