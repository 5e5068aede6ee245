// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::config::model::{RawWorkflowFile, WorkflowFile};
use crate::errors::Result;

/// Default workflow file, in the current working directory.
pub const DEFAULT_WORKFLOW_FILE: &str = "Workflow.toml";

/// Read and deserialize a workflow file.
///
/// This only performs TOML deserialization; use [`load_and_validate`] for
/// the semantic checks.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawWorkflowFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read workflow file {}", path.display()))?;
    load_from_str(&contents)
}

pub fn load_from_str(contents: &str) -> Result<RawWorkflowFile> {
    Ok(toml::from_str(contents)?)
}

/// Load a workflow file and validate it.
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks references, parent uniqueness, kind settings and cycles.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<WorkflowFile> {
    let raw = load_from_path(&path)?;
    WorkflowFile::try_from(raw)
}

/// Directory relative paths in a workflow file are resolved against.
///
/// A bare file name (`Workflow.toml`) resolves against the current working
/// directory.
pub fn workflow_root_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}
