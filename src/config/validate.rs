// src/config/validate.rs

use std::collections::BTreeMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{RawWorkflowFile, WorkflowFile};
use crate::errors::{Result, RunManagerError};
use crate::job::ToolVersion;
use crate::types::JobType;

impl TryFrom<RawWorkflowFile> for WorkflowFile {
    type Error = RunManagerError;

    fn try_from(raw: RawWorkflowFile) -> std::result::Result<Self, Self::Error> {
        validate_workflow(&raw)?;
        Ok(WorkflowFile::new_unchecked(raw.manager, raw.tools, raw.job))
    }
}

/// Run every check on a raw workflow, stopping at the first failure.
pub fn validate_workflow(cfg: &RawWorkflowFile) -> Result<()> {
    ensure_has_jobs(cfg)?;
    validate_manager(cfg)?;
    validate_tools(cfg)?;
    validate_references(cfg)?;
    validate_attachments(cfg)?;
    validate_kinds(cfg)?;
    validate_dag(cfg)?;
    Ok(())
}

fn config_error(msg: String) -> RunManagerError {
    RunManagerError::ConfigError(msg)
}

fn ensure_has_jobs(cfg: &RawWorkflowFile) -> Result<()> {
    if cfg.job.is_empty() {
        return Err(config_error(
            "workflow must contain at least one [job.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_manager(cfg: &RawWorkflowFile) -> Result<()> {
    if cfg.manager.max_workers == Some(0) {
        return Err(config_error(
            "[manager].max_workers must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_tools(cfg: &RawWorkflowFile) -> Result<()> {
    for tool in &cfg.tools {
        if tool.name.trim().is_empty() {
            return Err(config_error("[[tool]] entry with an empty name".to_string()));
        }
        if !tool.version.is_empty() {
            tool.version.parse::<ToolVersion>().map_err(|e| {
                config_error(format!("tool '{}' has invalid version: {e}", tool.name))
            })?;
        }
    }
    Ok(())
}

fn validate_references(cfg: &RawWorkflowFile) -> Result<()> {
    for (name, job) in &cfg.job {
        let targets = job
            .children
            .iter()
            .map(|c| (c, "children"))
            .chain(job.finished.iter().map(|f| (f, "finished")));

        for (target, field) in targets {
            if !cfg.job.contains_key(target) {
                return Err(config_error(format!(
                    "job '{name}' has unknown job '{target}' in `{field}`"
                )));
            }
            if target == name {
                return Err(config_error(format!(
                    "job '{name}' cannot reference itself in `{field}`"
                )));
            }
        }
    }
    Ok(())
}

/// A job has at most one parent, and is either somebody's child or
/// somebody's finished job, never both.
fn validate_attachments(cfg: &RawWorkflowFile) -> Result<()> {
    let mut parent_of: BTreeMap<&str, &str> = BTreeMap::new();
    for (name, job) in &cfg.job {
        for child in &job.children {
            if let Some(first) = parent_of.insert(child.as_str(), name.as_str()) {
                return Err(RunManagerError::AttachConflict(format!(
                    "job '{child}' is a child of both '{first}' and '{name}'"
                )));
            }
        }
    }

    for (name, job) in &cfg.job {
        if let Some(finished) = &job.finished {
            if let Some(parent) = parent_of.get(finished.as_str()) {
                return Err(RunManagerError::AttachConflict(format!(
                    "job '{finished}' is the finished job of '{name}' and a child of '{parent}'"
                )));
            }
        }
    }
    Ok(())
}

fn validate_kinds(cfg: &RawWorkflowFile) -> Result<()> {
    for (name, job) in &cfg.job {
        match job.kind {
            JobType::ToolBased => {
                if job.tool.as_deref().is_none_or(|t| t.trim().is_empty()) {
                    return Err(config_error(format!(
                        "job '{name}' of kind 'tool' needs a `tool`"
                    )));
                }
            }
            JobType::ParallelSplit => {
                if job.numsplits.unwrap_or(0) == 0 {
                    return Err(config_error(format!(
                        "job '{name}' of kind 'split' needs `numsplits` >= 1"
                    )));
                }
            }
            JobType::Null | JobType::XmlPreprocessor | JobType::Dakota => {}
        }

        if let Some(version) = &job.version {
            version.parse::<ToolVersion>().map_err(|e| {
                config_error(format!("job '{name}' has invalid tool version: {e}"))
            })?;
        }
    }
    Ok(())
}

fn validate_dag(cfg: &RawWorkflowFile) -> Result<()> {
    // Edge direction: parent -> child and attaching job -> finished job.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.job.keys() {
        graph.add_node(name.as_str());
    }

    for (name, job) in &cfg.job {
        for child in &job.children {
            graph.add_edge(name.as_str(), child.as_str(), ());
        }
        if let Some(finished) = &job.finished {
            graph.add_edge(name.as_str(), finished.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(RunManagerError::CycleDetected(format!(
            "cycle in workflow involving job '{}'",
            cycle.node_id()
        ))),
    }
}
