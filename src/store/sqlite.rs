// src/store/sqlite.rs

use std::fs;
use std::path::Path;

use anyhow::Context;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::errors::{Result, RunManagerError};
use crate::store::{JobRecord, JobStore};
use crate::types::JobId;

const SQL_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS jobs (
    id     TEXT PRIMARY KEY,
    kind   TEXT NOT NULL,
    record TEXT NOT NULL
)";

/// One row per job; the `record` column holds the JSON-encoded record.
#[derive(Debug)]
pub struct SqliteJobStore {
    connection: Connection,
}

impl SqliteJobStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create state directory {}", dir.display()))?;
        }
        let connection = Connection::open(path)?;
        info!(path = %path.display(), "opened sqlite job store");
        Self::init(connection)
    }

    /// Store backed by a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(connection: Connection) -> Result<Self> {
        connection.execute(SQL_SCHEMA, [])?;
        debug!("applied sqlite schema");
        Ok(Self { connection })
    }
}

fn decode(id: &str, record: &str) -> Result<JobRecord> {
    serde_json::from_str(record)
        .map_err(|e| RunManagerError::StoreError(format!("corrupt record for job {id}: {e}")))
}

fn upsert(connection: &Connection, record: &JobRecord) -> Result<()> {
    let encoded = serde_json::to_string(record)?;
    connection
        .prepare_cached(
            "INSERT INTO jobs (id, kind, record) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET kind = excluded.kind, record = excluded.record",
        )?
        .execute(params![record.id.to_string(), record.kind.as_str(), encoded])?;
    Ok(())
}

impl JobStore for SqliteJobStore {
    fn save_job(&mut self, record: &JobRecord) -> Result<()> {
        upsert(&self.connection, record)
    }

    fn save_jobs(&mut self, records: &[JobRecord]) -> Result<()> {
        let tx = self.connection.transaction()?;
        for record in records {
            upsert(&tx, record)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn load_job(&self, id: JobId) -> Result<Option<JobRecord>> {
        let key = id.to_string();
        let row: Option<String> = self
            .connection
            .prepare_cached("SELECT record FROM jobs WHERE id = ?1")?
            .query_row(params![key], |row| row.get(0))
            .optional()?;
        row.map(|record| decode(&key, &record)).transpose()
    }

    fn load_all(&self) -> Result<Vec<JobRecord>> {
        let mut stmt = self
            .connection
            .prepare_cached("SELECT id, record FROM jobs ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.iter().map(|(id, record)| decode(id, record)).collect()
    }

    fn remove_job(&mut self, id: JobId) -> Result<()> {
        self.connection
            .prepare_cached("DELETE FROM jobs WHERE id = ?1")?
            .execute(params![id.to_string()])?;
        Ok(())
    }
}
