// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::types::JobId;

#[derive(Error, Debug)]
pub enum RunManagerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Job already enqueued: {0}")]
    DuplicateJob(JobId),

    #[error("Cycle detected in job tree: {0}")]
    CycleDetected(String),

    #[error("Cannot attach job: {0}")]
    AttachConflict(String),

    #[error("Tool not found: {name} (version {version})")]
    ToolNotFound { name: String, version: String },

    #[error("Failed to spawn process: {0}")]
    ProcessSpawnFailure(String),

    #[error("Required input file missing: {0}")]
    InputFileMissing(String),

    #[error("Invalid job parameter: {0}")]
    InvalidParameter(String),

    #[error("Job tree {0} still has running jobs")]
    TreeBusy(JobId),

    #[error("State store error: {0}")]
    StoreError(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    #[error("Run manager is no longer running")]
    RuntimeStopped,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, RunManagerError>;
