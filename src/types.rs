use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable unique identity of a job.
///
/// Jobs created at runtime get a random (v4) id; jobs declared by name in a
/// workflow file get a name-derived (v5) id so that persisted state matches
/// the same job across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        JobId(Uuid::new_v4())
    }

    /// Deterministic id for a named job.
    pub fn from_name(name: &str) -> Self {
        JobId(Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(JobId)
    }
}

/// Kind tag of a job. Selects the handler in the job factory registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    #[serde(rename = "tool")]
    ToolBased,
    Null,
    #[serde(rename = "split")]
    ParallelSplit,
    XmlPreprocessor,
    Dakota,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::ToolBased => "tool",
            JobType::Null => "null",
            JobType::ParallelSplit => "split",
            JobType::XmlPreprocessor => "xmlpreprocessor",
            JobType::Dakota => "dakota",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tool" | "toolbased" => Ok(JobType::ToolBased),
            "null" => Ok(JobType::Null),
            "split" | "parallelsplit" => Ok(JobType::ParallelSplit),
            "xmlpreprocessor" | "xml" => Ok(JobType::XmlPreprocessor),
            "dakota" => Ok(JobType::Dakota),
            other => Err(format!(
                "invalid job kind: {other} (expected one of tool, null, split, xmlpreprocessor, dakota)"
            )),
        }
    }
}

/// Aggregate status of a whole job tree. Derived on demand, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreeStatus {
    Idle,
    Starting,
    Running,
    Finished,
    Failed,
    Canceled,
}

impl TreeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TreeStatus::Finished | TreeStatus::Failed | TreeStatus::Canceled
        )
    }
}

impl fmt::Display for TreeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TreeStatus::Idle => "idle",
            TreeStatus::Starting => "starting",
            TreeStatus::Running => "running",
            TreeStatus::Finished => "finished",
            TreeStatus::Failed => "failed",
            TreeStatus::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

/// Where job state is persisted between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreMode {
    /// Keep state in memory only (lost on restart).
    Memory,
    /// JSON document on disk (`.runmanager/state.json` by default).
    File,
    /// SQLite database.
    Sqlite,
}

impl Default for StoreMode {
    fn default() -> Self {
        StoreMode::File
    }
}
