//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::state::JobId;
use crate::storage::{DeadLetter, EpochRecord, EpochStatus};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Epoch not found: {0}")]
    EpochNotFound(i64),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for durable storage backends
///
/// Backends hold crawl epochs, dead-lettered jobs, and the most recent
/// checkpoint. Callers serialize access through a mutex, so methods take
/// `&mut self` for writes.
pub trait Storage: Send {
    // ===== Epoch Management =====

    /// Starts a new crawl epoch and returns its ID
    fn create_epoch(&mut self, config_hash: &str) -> StorageResult<i64>;

    fn get_epoch(&self, epoch_id: i64) -> StorageResult<EpochRecord>;

    fn get_latest_epoch(&self) -> StorageResult<Option<EpochRecord>>;

    /// Records how an epoch ended; `Completed` also stamps the finish time
    fn finish_epoch(&mut self, epoch_id: i64, status: EpochStatus) -> StorageResult<()>;

    // ===== Dead Letters =====

    /// Stores a dead-lettered job; replaces an earlier letter for the same job
    fn insert_dead_letter(&mut self, epoch_id: i64, letter: &DeadLetter) -> StorageResult<()>;

    /// Most recent letters first
    fn list_dead_letters(&self, epoch_id: i64, limit: usize) -> StorageResult<Vec<DeadLetter>>;

    /// Removes and returns a letter (for replay)
    fn take_dead_letter(&mut self, epoch_id: i64, job_id: JobId)
        -> StorageResult<Option<DeadLetter>>;

    fn count_dead_letters(&self, epoch_id: i64) -> StorageResult<u64>;

    /// Highest job ID ever dead-lettered in the epoch
    fn max_dead_letter_id(&self, epoch_id: i64) -> StorageResult<Option<JobId>>;

    fn dead_letter_ids(&self, epoch_id: i64) -> StorageResult<Vec<JobId>>;

    // ===== Checkpoint =====

    /// Replaces the stored checkpoint in a single transaction
    fn write_checkpoint(&mut self, payload: &str) -> StorageResult<()>;

    fn read_checkpoint(&self) -> StorageResult<Option<String>>;

    fn clear_checkpoint(&mut self) -> StorageResult<()>;
}
