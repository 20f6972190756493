//! In-memory storage backend
//!
//! Behaves like the SQLite backend but keeps everything in process memory.
//! Used by tests and embedders that need no durability.

use crate::state::JobId;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{DeadLetter, EpochRecord, EpochStatus};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct MemoryStorage {
    epochs: Vec<EpochRecord>,
    dead_letters: BTreeMap<(i64, JobId), DeadLetter>,
    checkpoint: Option<String>,

    /// When set, every write fails; simulates an unreachable backend
    fail_writes: Arc<AtomicBool>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent writes fail with a database error
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Switch that toggles write failures once the backend is shared
    pub fn fail_switch(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.fail_writes)
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Database("storage unreachable".to_string()));
        }
        Ok(())
    }
}

impl Storage for MemoryStorage {
    fn create_epoch(&mut self, config_hash: &str) -> StorageResult<i64> {
        self.check_writable()?;
        let id = self.epochs.len() as i64 + 1;
        self.epochs.push(EpochRecord {
            id,
            started_at: Utc::now().to_rfc3339(),
            finished_at: None,
            config_hash: config_hash.to_string(),
            status: EpochStatus::Running,
        });
        Ok(id)
    }

    fn get_epoch(&self, epoch_id: i64) -> StorageResult<EpochRecord> {
        self.epochs
            .iter()
            .find(|e| e.id == epoch_id)
            .cloned()
            .ok_or(StorageError::EpochNotFound(epoch_id))
    }

    fn get_latest_epoch(&self) -> StorageResult<Option<EpochRecord>> {
        Ok(self.epochs.last().cloned())
    }

    fn finish_epoch(&mut self, epoch_id: i64, status: EpochStatus) -> StorageResult<()> {
        self.check_writable()?;
        let epoch = self
            .epochs
            .iter_mut()
            .find(|e| e.id == epoch_id)
            .ok_or(StorageError::EpochNotFound(epoch_id))?;
        epoch.status = status;
        if status != EpochStatus::Running {
            epoch.finished_at = Some(Utc::now().to_rfc3339());
        }
        Ok(())
    }

    fn insert_dead_letter(&mut self, epoch_id: i64, letter: &DeadLetter) -> StorageResult<()> {
        self.check_writable()?;
        self.dead_letters
            .insert((epoch_id, letter.job.id), letter.clone());
        Ok(())
    }

    fn list_dead_letters(&self, epoch_id: i64, limit: usize) -> StorageResult<Vec<DeadLetter>> {
        let mut letters: Vec<DeadLetter> = self
            .dead_letters
            .iter()
            .filter(|((epoch, _), _)| *epoch == epoch_id)
            .map(|(_, letter)| letter.clone())
            .collect();
        letters.sort_by(|a, b| {
            b.dead_lettered_at
                .cmp(&a.dead_lettered_at)
                .then(b.job.id.cmp(&a.job.id))
        });
        letters.truncate(limit);
        Ok(letters)
    }

    fn take_dead_letter(
        &mut self,
        epoch_id: i64,
        job_id: JobId,
    ) -> StorageResult<Option<DeadLetter>> {
        self.check_writable()?;
        Ok(self.dead_letters.remove(&(epoch_id, job_id)))
    }

    fn count_dead_letters(&self, epoch_id: i64) -> StorageResult<u64> {
        Ok(self
            .dead_letters
            .keys()
            .filter(|(epoch, _)| *epoch == epoch_id)
            .count() as u64)
    }

    fn max_dead_letter_id(&self, epoch_id: i64) -> StorageResult<Option<JobId>> {
        Ok(self
            .dead_letters
            .keys()
            .filter(|(epoch, _)| *epoch == epoch_id)
            .map(|(_, id)| *id)
            .max())
    }

    fn dead_letter_ids(&self, epoch_id: i64) -> StorageResult<Vec<JobId>> {
        Ok(self
            .dead_letters
            .keys()
            .filter(|(epoch, _)| *epoch == epoch_id)
            .map(|(_, id)| *id)
            .collect())
    }

    fn write_checkpoint(&mut self, payload: &str) -> StorageResult<()> {
        self.check_writable()?;
        self.checkpoint = Some(payload.to_string());
        Ok(())
    }

    fn read_checkpoint(&self) -> StorageResult<Option<String>> {
        Ok(self.checkpoint.clone())
    }

    fn clear_checkpoint(&mut self) -> StorageResult<()> {
        self.check_writable()?;
        self.checkpoint = None;
        Ok(())
    }
}
