// src/job/tools.rs

//! Tool registry and version-constrained tool resolution.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, RunManagerError};

/// A (possibly partial) tool version such as `8`, `8.5` or `8.5.0-rc1`.
///
/// Components left unset act as wildcards when the version is used as a
/// constraint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolVersion {
    pub major: Option<u32>,
    pub minor: Option<u32>,
    pub patch: Option<u32>,
    pub tag: Option<String>,
}

impl ToolVersion {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn is_any(&self) -> bool {
        self.major.is_none() && self.minor.is_none() && self.patch.is_none() && self.tag.is_none()
    }

    /// Does this (concrete) version satisfy `constraint`?
    pub fn matches(&self, constraint: &ToolVersion) -> bool {
        fn component(have: Option<u32>, want: Option<u32>) -> bool {
            match want {
                None => true,
                Some(w) => have == Some(w),
            }
        }

        component(self.major, constraint.major)
            && component(self.minor, constraint.minor)
            && component(self.patch, constraint.patch)
            && match &constraint.tag {
                None => true,
                Some(t) => self.tag.as_deref() == Some(t.as_str()),
            }
    }

    fn sort_key(&self) -> (u32, u32, u32) {
        (
            self.major.unwrap_or(0),
            self.minor.unwrap_or(0),
            self.patch.unwrap_or(0),
        )
    }
}

impl FromStr for ToolVersion {
    type Err = RunManagerError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || s == "*" {
            return Ok(ToolVersion::any());
        }

        let (numbers, tag) = match s.split_once('-') {
            Some((n, t)) => (n, Some(t.to_string())),
            None => (s, None),
        };

        let mut parts = numbers.split('.');
        let mut next = |what: &str| -> Result<Option<u32>> {
            match parts.next() {
                None => Ok(None),
                Some(p) => p.parse::<u32>().map(Some).map_err(|_| {
                    RunManagerError::InvalidParameter(format!(
                        "invalid {what} component '{p}' in tool version '{s}'"
                    ))
                }),
            }
        };

        let major = next("major")?;
        let minor = next("minor")?;
        let patch = next("patch")?;

        Ok(ToolVersion {
            major,
            minor,
            patch,
            tag,
        })
    }
}

impl fmt::Display for ToolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_any() {
            return f.write_str("*");
        }
        let numbers: Vec<String> = [self.major, self.minor, self.patch]
            .iter()
            .map_while(|c| c.map(|v| v.to_string()))
            .collect();
        f.write_str(&numbers.join("."))?;
        if let Some(tag) = &self.tag {
            write!(f, "-{tag}")?;
        }
        Ok(())
    }
}

/// A concrete installed tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub version: ToolVersion,
    pub path: PathBuf,
}

impl ToolInfo {
    pub fn new(name: impl Into<String>, version: ToolVersion, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            version,
            path: path.into(),
        }
    }
}

/// A tool a job needs, with its version constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ToolRequirement {
    pub name: String,
    pub version: ToolVersion,
}

impl ToolRequirement {
    pub fn new(name: impl Into<String>, version: ToolVersion) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

impl FromStr for ToolRequirement {
    type Err = RunManagerError;

    /// Parses `name` or `name@version`.
    fn from_str(s: &str) -> Result<Self> {
        let (name, version) = match s.split_once('@') {
            Some((n, v)) => (n.trim(), v.parse()?),
            None => (s.trim(), ToolVersion::any()),
        };
        if name.is_empty() {
            return Err(RunManagerError::InvalidParameter(format!(
                "empty tool name in requirement '{s}'"
            )));
        }
        Ok(ToolRequirement::new(name, version))
    }
}

/// Resolves a tool name and version constraint to an executable path.
pub trait ToolResolver {
    fn resolve(&self, name: &str, version: &ToolVersion) -> Result<PathBuf>;
}

/// Collection of installed tools.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tools(Vec<ToolInfo>);

impl Tools {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, tool: ToolInfo) {
        self.0.push(tool);
    }

    pub fn with(mut self, tool: ToolInfo) -> Self {
        self.push(tool);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolInfo> {
        self.0.iter()
    }

    /// Tools of `self` followed by those of `other`.
    pub fn merged(&self, other: &Tools) -> Tools {
        let mut all = self.0.clone();
        all.extend(other.0.iter().cloned());
        Tools(all)
    }
}

impl ToolResolver for Tools {
    /// Picks the newest registered version that satisfies the constraint.
    fn resolve(&self, name: &str, version: &ToolVersion) -> Result<PathBuf> {
        self.0
            .iter()
            .filter(|t| t.name == name && t.version.matches(version))
            .max_by_key(|t| t.version.sort_key())
            .map(|t| t.path.clone())
            .ok_or_else(|| RunManagerError::ToolNotFound {
                name: name.to_string(),
                version: version.to_string(),
            })
    }
}

impl FromIterator<ToolInfo> for Tools {
    fn from_iter<I: IntoIterator<Item = ToolInfo>>(iter: I) -> Self {
        Tools(iter.into_iter().collect())
    }
}
