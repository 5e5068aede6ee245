// src/fs/mock.rs

use super::{FileMeta, FileSystem};
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
struct MockFile {
    content: Vec<u8>,
    modified: SystemTime,
}

#[derive(Debug, Default)]
struct MockState {
    files: HashMap<PathBuf, MockFile>,
    /// Logical clock; every write moves it forward one second.
    clock: u64,
}

impl MockState {
    fn tick(&mut self) -> SystemTime {
        self.clock += 1;
        UNIX_EPOCH + Duration::from_secs(1_000_000 + self.clock)
    }
}

/// In-memory file system with a deterministic modification clock.
///
/// Clones share the same files, so a test can keep one handle while the
/// scheduler owns another. A path is a directory when some file lives below
/// it.
#[derive(Debug, Clone, Default)]
pub struct MockFileSystem {
    state: Arc<Mutex<MockState>>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread leaves the map itself intact.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create or replace a file.
    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        let mut state = self.lock();
        let modified = state.tick();
        state.files.insert(
            path.as_ref().to_path_buf(),
            MockFile {
                content: content.into(),
                modified,
            },
        );
    }

    /// Move a file's modification time forward without changing its content.
    pub fn touch(&self, path: impl AsRef<Path>) {
        let mut state = self.lock();
        let now = state.tick();
        if let Some(file) = state.files.get_mut(path.as_ref()) {
            file.modified = now;
        }
    }

    pub fn remove_file(&self, path: impl AsRef<Path>) {
        self.lock().files.remove(path.as_ref());
    }
}

impl FileSystem for MockFileSystem {
    fn exists(&self, path: &Path) -> bool {
        let state = self.lock();
        state.files.contains_key(path) || state.files.keys().any(|p| p.starts_with(path))
    }

    fn is_file(&self, path: &Path) -> bool {
        self.lock().files.contains_key(path)
    }

    fn metadata(&self, path: &Path) -> Result<FileMeta> {
        let state = self.lock();
        match state.files.get(path) {
            Some(file) => Ok(FileMeta {
                size: file.content.len() as u64,
                modified: Some(file.modified),
            }),
            None if state.files.keys().any(|p| p.starts_with(path)) => Ok(FileMeta {
                size: 0,
                modified: None,
            }),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn open_read(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        match self.lock().files.get(path) {
            Some(file) => Ok(Box::new(Cursor::new(file.content.clone()))),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }
}
