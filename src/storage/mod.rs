//! Storage module for durable frontier state
//!
//! This module handles all persistence for the coordinator:
//! - Crawl epoch tracking (start, finish, config hash)
//! - Dead-lettered jobs with their failure history
//! - The single most recent checkpoint
//!
//! SQLite is the production backend; `MemoryStorage` backs tests and
//! throwaway runs.

mod memory;
mod schema;
mod sqlite;
mod traits;

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::state::Job;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A storage backend shared between the queue, the dead-letter store and
/// the checkpoint manager
pub type SharedStorage = Arc<Mutex<Box<dyn Storage>>>;

/// Wraps a backend for sharing
pub fn shared<S: Storage + 'static>(storage: S) -> SharedStorage {
    Arc::new(Mutex::new(Box::new(storage)))
}

/// Locks shared storage, recovering the guard if a previous holder panicked
///
/// Storage methods leave the backend consistent on error, so a poisoned
/// lock carries no torn state.
pub fn lock(storage: &SharedStorage) -> MutexGuard<'_, Box<dyn Storage>> {
    storage.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Opens the SQLite database at `path`, creating it if needed
pub fn open_storage(path: &Path) -> StorageResult<SqliteStorage> {
    SqliteStorage::new(path)
}

/// A job that was set aside after exhausting retries or failing permanently
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// The job as it was when it was dead-lettered, including its error history
    pub job: Job,
    pub final_error: String,
    pub dead_lettered_at: DateTime<Utc>,
}

/// Represents a crawl epoch
#[derive(Debug, Clone)]
pub struct EpochRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: EpochStatus,
}

/// Status of a crawl epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl EpochStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// An epoch that did not complete can be resumed from its checkpoint
    pub fn is_resumable(&self) -> bool {
        !matches!(self, Self::Completed)
    }
}
