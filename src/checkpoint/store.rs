//! Checkpoint storage backends

use crate::storage::{lock, SharedStorage, StorageResult};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Holds at most one checkpoint payload
pub trait CheckpointStore: Send + Sync {
    /// Replaces the stored payload; readers see either the old or the new one
    fn write(&self, payload: &str) -> StorageResult<()>;

    fn read(&self) -> StorageResult<Option<String>>;

    fn clear(&self) -> StorageResult<()>;
}

/// Checkpoint in a single file, replaced by writing a temp file and renaming it
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        self.path.with_extension("tmp")
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn write(&self, payload: &str) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = self.temp_path();
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(payload.as_bytes())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    fn read(&self) -> StorageResult<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(payload) => Ok(Some(payload)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn clear(&self) -> StorageResult<()> {
        for path in [self.path.clone(), self.temp_path()] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}

/// Checkpoint in the single-row `checkpoint` table of the storage backend
///
/// The row is replaced inside one transaction, which gives the same
/// all-or-nothing visibility as the file store's rename.
#[derive(Clone)]
pub struct DatabaseCheckpointStore {
    storage: SharedStorage,
}

impl DatabaseCheckpointStore {
    pub fn new(storage: SharedStorage) -> Self {
        Self { storage }
    }
}

impl CheckpointStore for DatabaseCheckpointStore {
    fn write(&self, payload: &str) -> StorageResult<()> {
        lock(&self.storage).write_checkpoint(payload)
    }

    fn read(&self) -> StorageResult<Option<String>> {
        lock(&self.storage).read_checkpoint()
    }

    fn clear(&self) -> StorageResult<()> {
        lock(&self.storage).clear_checkpoint()
    }
}
