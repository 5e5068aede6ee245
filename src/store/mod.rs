// src/store/mod.rs

//! Persistence of job records between runs.
//!
//! - [`memory`] keeps records in a map (lost on restart).
//! - [`file`] rewrites one JSON document on every save (once per batch).
//! - [`sqlite`] stores one row per job.
//!
//! [`restore_graphs`] turns a set of loaded records back into job trees.

pub mod file;
pub mod memory;
pub mod sqlite;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dag::JobGraph;
use crate::errors::{Result, RunManagerError};
use crate::job::{Files, Job, JobFactory, JobParams, JobState, Tools};
use crate::types::{JobId, JobType, StoreMode};

pub use file::FileJobStore;
pub use memory::MemoryJobStore;
pub use sqlite::SqliteJobStore;

/// Everything needed to rebuild a job and its outgoing edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub kind: JobType,
    #[serde(default)]
    pub params: JobParams,
    #[serde(default)]
    pub input_files: Files,
    #[serde(default)]
    pub tools: Tools,
    #[serde(default)]
    pub out_dir: Option<PathBuf>,
    #[serde(default)]
    pub children: Vec<JobId>,
    #[serde(default)]
    pub finished_job: Option<JobId>,
    #[serde(default)]
    pub state: JobState,
}

impl JobRecord {
    pub fn from_job(job: &Job) -> Self {
        Self {
            id: job.id(),
            kind: job.kind(),
            params: job.params().clone(),
            input_files: job.input_files().clone(),
            tools: job.tools().clone(),
            out_dir: job.out_dir().cloned(),
            children: job.children().to_vec(),
            finished_job: job.finished_job(),
            state: job.state().clone(),
        }
    }
}

/// Storage of job records, keyed by job id.
pub trait JobStore: Send {
    /// Insert or replace the record of `record.id`.
    fn save_job(&mut self, record: &JobRecord) -> Result<()>;

    /// Save several records at once. Stores with a costly commit override
    /// this to commit once per batch.
    fn save_jobs(&mut self, records: &[JobRecord]) -> Result<()> {
        for record in records {
            self.save_job(record)?;
        }
        Ok(())
    }

    fn load_job(&self, id: JobId) -> Result<Option<JobRecord>>;

    /// Every stored record, in a stable order.
    fn load_all(&self) -> Result<Vec<JobRecord>>;

    /// Remove a record; removing an unknown id is not an error.
    fn remove_job(&mut self, id: JobId) -> Result<()>;
}

/// Open the store selected in the workflow settings.
///
/// `path` is ignored for [`StoreMode::Memory`].
pub fn open_store(mode: StoreMode, path: &Path) -> Result<Box<dyn JobStore>> {
    let store: Box<dyn JobStore> = match mode {
        StoreMode::Memory => Box::new(MemoryJobStore::new()),
        StoreMode::File => Box::new(FileJobStore::open(path)?),
        StoreMode::Sqlite => Box::new(SqliteJobStore::open(path)?),
    };
    Ok(store)
}

/// Rebuild job trees from persisted records.
///
/// Returns one arena per tree together with its root, in record order.
/// Edges pointing at records that are missing, or trees that share a job,
/// are reported as `StoreError`.
pub fn restore_graphs(records: &[JobRecord], factory: &JobFactory) -> Result<Vec<(JobGraph, JobId)>> {
    let mut all = JobGraph::new();
    for record in records {
        all.insert(factory.restore(record)?);
    }

    let known: HashMap<JobId, &JobRecord> = records.iter().map(|r| (r.id, r)).collect();
    for record in records {
        for child in &record.children {
            if !known.contains_key(child) {
                return Err(missing(record.id, *child));
            }
            all.add_child(record.id, *child)?;
        }
        if let Some(finished) = record.finished_job {
            if !known.contains_key(&finished) {
                return Err(missing(record.id, finished));
            }
            all.set_finished_job(record.id, finished)?;
        }
    }

    let mut seen: HashSet<JobId> = HashSet::new();
    let mut trees = Vec::new();
    for root in all.roots() {
        let members = all.tree_members(root);
        if let Some(shared) = members.iter().find(|id| !seen.insert(**id)) {
            return Err(RunManagerError::StoreError(format!(
                "job {shared} belongs to more than one stored tree"
            )));
        }
        let tree = all.extract_tree(root)?;
        debug!(tree = %root, jobs = tree.len(), "restored job tree");
        trees.push((tree, root));
    }

    if !all.is_empty() {
        return Err(RunManagerError::StoreError(format!(
            "{} stored jobs are not reachable from any root",
            all.len()
        )));
    }
    Ok(trees)
}

fn missing(owner: JobId, target: JobId) -> RunManagerError {
    RunManagerError::StoreError(format!("job {owner} references unknown job {target}"))
}
