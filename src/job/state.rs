// src/job/state.rs

//! Snapshot of a job's last run: timestamp, tracked input checksums,
//! success/failure and produced outputs.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::files::Files;

/// Recorded checksum and timestamp of one tracked input file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTrack {
    pub path: PathBuf,
    /// blake3 hex digest of the file contents.
    pub checksum: String,
    pub modified: Option<DateTime<Utc>>,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorLevel {
    Success,
    Warning,
    Error,
}

/// Structured success/warning/error list of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobErrors {
    pub level: ErrorLevel,
    pub messages: Vec<(ErrorLevel, String)>,
}

impl JobErrors {
    pub fn success() -> Self {
        Self {
            level: ErrorLevel::Success,
            messages: Vec::new(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        let mut errors = Self::success();
        errors.add_error(message);
        errors
    }

    pub fn succeeded(&self) -> bool {
        self.level != ErrorLevel::Error
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.messages.push((ErrorLevel::Error, message.into()));
        self.level = ErrorLevel::Error;
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.messages.push((ErrorLevel::Warning, message.into()));
        self.level = self.level.max(ErrorLevel::Warning);
    }

    pub fn errors(&self) -> impl Iterator<Item = &str> {
        self.messages
            .iter()
            .filter(|(l, _)| *l == ErrorLevel::Error)
            .map(|(_, m)| m.as_str())
    }
}

/// Immutable record of the last completed run of a job.
///
/// A job that has never run has `last_run == None` and a non-succeeded
/// `errors` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobState {
    pub last_run: Option<DateTime<Utc>>,
    pub errors: JobErrors,
    #[serde(default)]
    pub output_files: Files,
    #[serde(default)]
    pub tracked_files: Vec<FileTrack>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
}

impl JobState {
    pub fn never_run() -> Self {
        Self {
            last_run: None,
            errors: JobErrors::failed("job has not run"),
            output_files: Files::new(),
            tracked_files: Vec::new(),
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    /// Whether the recorded run finished successfully.
    pub fn succeeded(&self) -> bool {
        self.last_run.is_some() && self.errors.succeeded()
    }

    /// `true` if this run happened strictly before `other`.
    ///
    /// Two runs recorded with the same timestamp did not run before each
    /// other.
    pub fn ran_before(&self, other: &JobState) -> bool {
        match (self.last_run, other.last_run) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        }
    }
}

impl Default for JobState {
    fn default() -> Self {
        Self::never_run()
    }
}
