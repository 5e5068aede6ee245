// src/store/memory.rs

use std::collections::BTreeMap;

use crate::errors::Result;
use crate::store::{JobRecord, JobStore};
use crate::types::JobId;

/// Keeps records in memory only.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    records: BTreeMap<JobId, JobRecord>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl JobStore for MemoryJobStore {
    fn save_job(&mut self, record: &JobRecord) -> Result<()> {
        self.records.insert(record.id, record.clone());
        Ok(())
    }

    fn load_job(&self, id: JobId) -> Result<Option<JobRecord>> {
        Ok(self.records.get(&id).cloned())
    }

    fn load_all(&self) -> Result<Vec<JobRecord>> {
        Ok(self.records.values().cloned().collect())
    }

    fn remove_job(&mut self, id: JobId) -> Result<()> {
        self.records.remove(&id);
        Ok(())
    }
}
