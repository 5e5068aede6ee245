// src/store/file.rs

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::Result;
use crate::store::{JobRecord, JobStore};
use crate::types::JobId;

/// Default location of the JSON state document, relative to the workflow.
pub const DEFAULT_STATE_PATH: &str = ".runmanager/state.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateDocument {
    #[serde(default)]
    jobs: Vec<JobRecord>,
}

/// JSON document on disk, rewritten after every change.
///
/// Records are kept in memory and ordered by id, so the file content only
/// depends on the stored records.
#[derive(Debug)]
pub struct FileJobStore {
    path: PathBuf,
    records: BTreeMap<JobId, JobRecord>,
}

impl FileJobStore {
    /// Open (or start) the document at `path`. A missing file is an empty
    /// store; a corrupt one is an error.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records = if path.is_file() {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("failed to read state file {}", path.display()))?;
            let doc: StateDocument = serde_json::from_str(&text)?;
            info!(path = %path.display(), jobs = doc.jobs.len(), "loaded job state");
            doc.jobs.into_iter().map(|r| (r.id, r)).collect()
        } else {
            debug!(path = %path.display(), "no state file yet");
            BTreeMap::new()
        };
        Ok(Self { path, records })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create state directory {}", dir.display()))?;
        }
        let doc = StateDocument {
            jobs: self.records.values().cloned().collect(),
        };
        let text = serde_json::to_string_pretty(&doc)?;

        // Readers only ever see a complete document.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, text)
            .with_context(|| format!("failed to write state file {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace state file {}", self.path.display()))?;
        Ok(())
    }
}

impl JobStore for FileJobStore {
    fn save_job(&mut self, record: &JobRecord) -> Result<()> {
        self.records.insert(record.id, record.clone());
        self.flush()
    }

    fn save_jobs(&mut self, records: &[JobRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        for record in records {
            self.records.insert(record.id, record.clone());
        }
        debug!(path = %self.path.display(), jobs = records.len(), "saving job batch");
        self.flush()
    }

    fn load_job(&self, id: JobId) -> Result<Option<JobRecord>> {
        Ok(self.records.get(&id).cloned())
    }

    fn load_all(&self) -> Result<Vec<JobRecord>> {
        Ok(self.records.values().cloned().collect())
    }

    fn remove_job(&mut self, id: JobId) -> Result<()> {
        if self.records.remove(&id).is_some() {
            self.flush()?;
        }
        Ok(())
    }
}
