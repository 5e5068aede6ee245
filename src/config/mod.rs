// src/config/mod.rs

//! Workflow files.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a workflow file from disk (`loader.rs`).
//! - Validate references, attachments and acyclicity (`validate.rs`).
//! - Turn a validated workflow into job graphs, the tool registry and
//!   scheduler options (this module).

pub mod loader;
pub mod model;
pub mod validate;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::dag::{JobGraph, SchedulerOptions};
use crate::errors::{Result, RunManagerError};
use crate::job::kind::keys;
use crate::job::{FileInfo, Files, JobFactory, JobParams, ToolInfo, ToolVersion, Tools};
use crate::store::file::DEFAULT_STATE_PATH;
use crate::types::{JobId, StoreMode};

pub use loader::{load_and_validate, load_from_path, load_from_str, workflow_root_dir};
pub use model::{JobSection, ManagerSection, RawWorkflowFile, ToolSection, WorkflowFile};
pub use validate::validate_workflow;

const DEFAULT_SQLITE_PATH: &str = ".runmanager/state.sqlite";

/// Jobs of a workflow, wired together, with the roots of its trees.
#[derive(Debug)]
pub struct WorkflowGraph {
    pub graph: JobGraph,
    /// Root jobs, in job-name order.
    pub roots: Vec<JobId>,
    /// Job name to id.
    pub names: BTreeMap<String, JobId>,
}

impl WorkflowGraph {
    pub fn name_of(&self, id: JobId) -> &str {
        name_in(&self.names, id)
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn parse_version(version: &str) -> Result<ToolVersion> {
    if version.trim().is_empty() {
        Ok(ToolVersion::any())
    } else {
        version.parse()
    }
}

/// Tools registered with `[[tool]]`.
pub fn tool_registry(cfg: &WorkflowFile, base: &Path) -> Result<Tools> {
    cfg.tools
        .iter()
        .map(|t| {
            Ok(ToolInfo::new(
                t.name.trim(),
                parse_version(&t.version)?,
                resolve(base, &t.path),
            ))
        })
        .collect()
}

pub fn scheduler_options(cfg: &WorkflowFile, base: &Path) -> SchedulerOptions {
    let defaults = SchedulerOptions::default();
    SchedulerOptions {
        max_workers: cfg.manager.max_workers.unwrap_or(defaults.max_workers),
        paused: cfg.manager.paused,
        work_dir: resolve(base, &cfg.manager.work_dir),
    }
}

/// Where the configured store keeps its data.
pub fn state_path(cfg: &WorkflowFile, base: &Path) -> PathBuf {
    let path = match (&cfg.manager.state_path, cfg.manager.state_store) {
        (Some(p), _) => p.clone(),
        (None, StoreMode::Sqlite) => PathBuf::from(DEFAULT_SQLITE_PATH),
        (None, _) => PathBuf::from(DEFAULT_STATE_PATH),
    };
    resolve(base, &path)
}

fn job_params(section: &JobSection) -> JobParams {
    let mut params = JobParams::new();
    if let Some(desc) = &section.description {
        params.push(keys::DESCRIPTION, desc.as_str());
    }
    if let Some(tool) = &section.tool {
        params.push(keys::TOOL, tool.trim());
    }
    if let Some(version) = section.version.as_deref().filter(|v| !v.trim().is_empty()) {
        params.push(keys::TOOL_VERSION, version.trim());
    }
    for arg in &section.args {
        params.push(keys::ARG, arg.as_str());
    }
    if let Some(n) = section.numsplits {
        params.push(keys::NUM_SPLITS, n.to_string());
    }
    if let Some(offset) = section.offset {
        params.push(keys::OFFSET, offset.to_string());
    }
    for p in &section.params {
        params.push(p.key.as_str(), p.value.as_str());
    }
    params
}

fn job_files(section: &JobSection, base: &Path) -> Files {
    section
        .files
        .iter()
        .map(|f| {
            let path = resolve(base, &f.path);
            let mut info = match &f.type_tag {
                Some(tag) => FileInfo::with_type(path, tag.as_str()),
                None => FileInfo::new(path),
            };
            for req in &f.required {
                info.add_required_file(resolve(base, &req.source), req.target.clone());
            }
            info
        })
        .collect()
}

fn lookup(names: &BTreeMap<String, JobId>, name: &str) -> Result<JobId> {
    names
        .get(name)
        .copied()
        .ok_or_else(|| RunManagerError::ConfigError(format!("unknown job '{name}'")))
}

fn name_in(names: &BTreeMap<String, JobId>, id: JobId) -> &str {
    names
        .iter()
        .find(|(_, v)| **v == id)
        .map(|(k, _)| k.as_str())
        .unwrap_or("?")
}

/// Create every job of the workflow and wire up its edges.
///
/// Job ids derive from job names, so they are the same on every run. Each
/// job belongs to exactly one tree; a finished job joining two trees is
/// rejected.
pub fn build_graph(cfg: &WorkflowFile, factory: &JobFactory, base: &Path) -> Result<WorkflowGraph> {
    let names: BTreeMap<String, JobId> = cfg
        .job
        .keys()
        .map(|name| (name.clone(), JobId::from_name(name)))
        .collect();

    let mut graph = JobGraph::new();
    for (name, section) in &cfg.job {
        let mut job = factory.create_with_id(
            lookup(&names, name)?,
            section.kind,
            job_params(section),
            job_files(section, base),
            Tools::new(),
        )?;
        if let Some(dir) = &section.out_dir {
            job.set_out_dir(resolve(base, dir));
        }
        graph.insert(job);
    }

    for (name, section) in &cfg.job {
        let id = lookup(&names, name)?;
        for child in &section.children {
            graph.add_child(id, lookup(&names, child)?)?;
        }
        if let Some(finished) = &section.finished {
            graph.set_finished_job(id, lookup(&names, finished)?)?;
        }
    }

    let roots = graph.roots();
    let mut owner: BTreeMap<JobId, JobId> = BTreeMap::new();
    for root in &roots {
        for member in graph.tree_members(*root) {
            if let Some(other) = owner.insert(member, *root) {
                return Err(RunManagerError::AttachConflict(format!(
                    "job '{}' is reachable from both '{}' and '{}'",
                    name_in(&names, member),
                    name_in(&names, other),
                    name_in(&names, *root)
                )));
            }
        }
    }
    debug!(jobs = graph.len(), roots = roots.len(), "built workflow graph");
    Ok(WorkflowGraph {
        graph,
        roots,
        names,
    })
}
