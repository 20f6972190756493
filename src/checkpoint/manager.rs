use crate::checkpoint::{Checkpoint, CheckpointStore, CHECKPOINT_VERSION};
use crate::config::CheckpointConfig;
use crate::storage::StorageResult;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// What actually goes into the store: the checkpoint JSON and its digest
#[derive(Debug, Serialize, Deserialize)]
struct CheckpointEnvelope {
    checksum: String,
    payload: String,
}

fn checksum(payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

/// Saves and loads checkpoints and decides when the next one is due
///
/// A checkpoint is due after `every_jobs` acknowledgements or `interval`
/// of wall time since the last save, whichever comes first.
pub struct CheckpointManager {
    store: Box<dyn CheckpointStore>,
    every_jobs: u64,
    interval: Duration,
    saved_completed: u64,
    saved_at: Instant,
}

impl CheckpointManager {
    pub fn new(store: Box<dyn CheckpointStore>, every_jobs: u64, interval: Duration) -> Self {
        Self {
            store,
            every_jobs,
            interval,
            saved_completed: 0,
            saved_at: Instant::now(),
        }
    }

    pub fn from_config(store: Box<dyn CheckpointStore>, config: &CheckpointConfig) -> Self {
        Self::new(store, config.every_jobs, config.interval())
    }

    /// Writes `checkpoint`, replacing the previous one atomically
    ///
    /// `completed` is the acknowledgement count the snapshot reflects; the
    /// job-count trigger restarts from it.
    pub fn save(&mut self, checkpoint: &Checkpoint, completed: u64) -> StorageResult<()> {
        let payload = serde_json::to_string(checkpoint)?;
        let envelope = CheckpointEnvelope {
            checksum: checksum(&payload),
            payload,
        };
        self.store.write(&serde_json::to_string(&envelope)?)?;

        self.saved_completed = completed;
        self.saved_at = Instant::now();
        info!(
            epoch = checkpoint.epoch_id,
            jobs = checkpoint.frontier.jobs.len(),
            seen = checkpoint.frontier.seen.len(),
            "Checkpoint saved"
        );
        Ok(())
    }

    /// Loads the last checkpoint
    ///
    /// A missing, unreadable or tampered checkpoint yields `None` so the
    /// caller starts from an empty frontier. Only a failure to reach the
    /// store is an error.
    pub fn load(&self) -> StorageResult<Option<Checkpoint>> {
        let Some(raw) = self.store.read()? else {
            info!("No checkpoint found");
            return Ok(None);
        };

        let envelope: CheckpointEnvelope = match serde_json::from_str(&raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Ignoring corrupt checkpoint: {}", e);
                return Ok(None);
            }
        };
        if checksum(&envelope.payload) != envelope.checksum {
            warn!("Ignoring checkpoint with checksum mismatch");
            return Ok(None);
        }

        let checkpoint: Checkpoint = match serde_json::from_str(&envelope.payload) {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                warn!("Ignoring unreadable checkpoint: {}", e);
                return Ok(None);
            }
        };
        if checkpoint.version != CHECKPOINT_VERSION {
            warn!(
                "Ignoring checkpoint with version {} (expected {})",
                checkpoint.version, CHECKPOINT_VERSION
            );
            return Ok(None);
        }

        info!(
            epoch = checkpoint.epoch_id,
            saved_at = %checkpoint.saved_at,
            jobs = checkpoint.frontier.jobs.len(),
            "Checkpoint loaded"
        );
        Ok(Some(checkpoint))
    }

    pub fn due(&self, completed: u64, now: Instant) -> bool {
        let jobs_since = completed.saturating_sub(self.saved_completed);
        (self.every_jobs > 0 && jobs_since >= self.every_jobs)
            || now.saturating_duration_since(self.saved_at) >= self.interval
    }

    /// Removes the stored checkpoint (epoch reset)
    pub fn clear(&mut self) -> StorageResult<()> {
        self.store.clear()?;
        self.saved_completed = 0;
        self.saved_at = Instant::now();
        Ok(())
    }
}
