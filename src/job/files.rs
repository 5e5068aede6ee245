// src/job/files.rs

//! Named input/output files with a type tag.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{Result, RunManagerError};

/// Extra file (or directory) that must sit next to a [`FileInfo`] when it is
/// materialized into a working directory, e.g. an `include/` directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredFile {
    pub source: PathBuf,
    /// Path relative to the working directory.
    pub target: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Name used when the file is copied into a working directory.
    pub filename: String,
    pub path: PathBuf,
    /// Type tag, by default the lower-cased extension (`idf`, `xml`, `in`).
    pub type_tag: String,
    #[serde(default)]
    pub required_files: Vec<RequiredFile>,
}

impl FileInfo {
    /// Build a file descriptor, deriving the type tag from the extension.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let type_tag = type_tag_of(&path);
        Self::with_type(path, type_tag)
    }

    pub fn with_type(path: impl Into<PathBuf>, type_tag: impl Into<String>) -> Self {
        let path = path.into();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            filename,
            path,
            type_tag: type_tag.into(),
            required_files: Vec::new(),
        }
    }

    pub fn add_required_file(&mut self, source: impl Into<PathBuf>, target: impl Into<PathBuf>) {
        self.required_files.push(RequiredFile {
            source: source.into(),
            target: target.into(),
        });
    }
}

/// Lower-cased extension of `path`, or an empty string.
pub fn type_tag_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Ordered collection of [`FileInfo`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Files(Vec<FileInfo>);

impl Files {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, file: FileInfo) {
        self.0.push(file);
    }

    pub fn extend(&mut self, other: &Files) {
        self.0.extend(other.0.iter().cloned());
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileInfo> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&FileInfo> {
        self.0.last()
    }

    /// Last file carrying the given type tag.
    pub fn last_by_type(&self, type_tag: &str) -> Result<&FileInfo> {
        self.0
            .iter()
            .rev()
            .find(|f| f.type_tag.eq_ignore_ascii_case(type_tag))
            .ok_or_else(|| {
                RunManagerError::InputFileMissing(format!("no input file of type '{type_tag}'"))
            })
    }

    pub fn all_by_type(&self, type_tag: &str) -> Files {
        Files(
            self.0
                .iter()
                .filter(|f| f.type_tag.eq_ignore_ascii_case(type_tag))
                .cloned()
                .collect(),
        )
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.0.iter().map(|f| f.path.clone()).collect()
    }
}

impl FromIterator<FileInfo> for Files {
    fn from_iter<I: IntoIterator<Item = FileInfo>>(iter: I) -> Self {
        Files(iter.into_iter().collect())
    }
}

impl IntoIterator for Files {
    type Item = FileInfo;
    type IntoIter = std::vec::IntoIter<FileInfo>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
