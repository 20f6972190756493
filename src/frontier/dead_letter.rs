//! Durable store for jobs that will not be retried automatically

use crate::state::{Job, JobId, JobState};
use crate::storage::{lock, DeadLetter, SharedStorage, StorageResult};
use chrono::Utc;
use std::collections::HashSet;
use tracing::info;

/// Dead-letter store for one crawl epoch
///
/// Append and read only. Letters leave the store through [`take`], which the
/// queue calls for an explicit operator replay.
///
/// [`take`]: DeadLetterStore::take
#[derive(Clone)]
pub struct DeadLetterStore {
    storage: SharedStorage,
    epoch_id: i64,
}

impl DeadLetterStore {
    pub fn new(storage: SharedStorage, epoch_id: i64) -> Self {
        Self { storage, epoch_id }
    }

    pub fn epoch_id(&self) -> i64 {
        self.epoch_id
    }

    pub fn add(&self, mut job: Job, final_error: &str) -> StorageResult<()> {
        job.state = JobState::DeadLettered;
        job.leased_at = None;
        job.leased_by = None;

        info!(
            job = %job.id,
            url = %job.url,
            attempts = job.attempts,
            "Dead-lettered: {}",
            final_error
        );

        let letter = DeadLetter {
            job,
            final_error: final_error.to_string(),
            dead_lettered_at: Utc::now(),
        };
        lock(&self.storage).insert_dead_letter(self.epoch_id, &letter)
    }

    pub fn list(&self, limit: usize) -> StorageResult<Vec<DeadLetter>> {
        lock(&self.storage).list_dead_letters(self.epoch_id, limit)
    }

    pub fn take(&self, id: JobId) -> StorageResult<Option<DeadLetter>> {
        lock(&self.storage).take_dead_letter(self.epoch_id, id)
    }

    pub fn count(&self) -> StorageResult<u64> {
        lock(&self.storage).count_dead_letters(self.epoch_id)
    }

    /// Highest job ID in the store, so new IDs never collide with a letter
    pub fn max_id(&self) -> StorageResult<Option<JobId>> {
        lock(&self.storage).max_dead_letter_id(self.epoch_id)
    }

    pub fn ids(&self) -> StorageResult<HashSet<JobId>> {
        Ok(lock(&self.storage)
            .dead_letter_ids(self.epoch_id)?
            .into_iter()
            .collect())
    }
}
