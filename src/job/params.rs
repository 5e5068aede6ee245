// src/job/params.rs

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, RunManagerError};

/// A single `key = value` entry of a [`JobParams`] bag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobParam {
    pub key: String,
    pub value: String,
}

/// Ordered key/value parameter bag.
///
/// Keys may repeat (e.g. several `arg` entries); insertion order is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobParams(Vec<JobParam>);

impl JobParams {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push(JobParam {
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(key, value);
        self
    }

    /// First value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|p| p.key == key)
            .map(|p| p.value.as_str())
    }

    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.0
            .iter()
            .filter(|p| p.key == key)
            .map(|p| p.value.as_str())
            .collect()
    }

    /// Parse the first value under `key`, if present.
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
                RunManagerError::InvalidParameter(format!(
                    "parameter '{key}' has unparsable value '{raw}'"
                ))
            }),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.iter().any(|p| p.key == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &JobParam> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for JobParams {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| JobParam { key, value })
                .collect(),
        )
    }
}
