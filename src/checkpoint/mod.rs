//! Crash-safe checkpoints of the frontier
//!
//! A checkpoint holds the seen-set, every job not yet completed or
//! dead-lettered, and the per-domain state. Only the most recent checkpoint
//! is kept; each save supersedes the last.
//!
//! # Components
//!
//! - `Checkpoint`: the serialized snapshot and its epoch
//! - `CheckpointStore`: where checkpoint bytes live (file or database)
//! - `CheckpointManager`: integrity check, save cadence and load-or-start-fresh

mod manager;
mod store;

pub use manager::CheckpointManager;
pub use store::{CheckpointStore, DatabaseCheckpointStore, FileCheckpointStore};

use crate::frontier::FrontierSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Format version written into every checkpoint
pub const CHECKPOINT_VERSION: u32 = 1;

/// A point-in-time snapshot of the frontier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,

    /// Crawl epoch the snapshot belongs to
    pub epoch_id: i64,

    pub saved_at: DateTime<Utc>,
    pub frontier: FrontierSnapshot,
}

impl Checkpoint {
    pub fn new(epoch_id: i64, frontier: FrontierSnapshot) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            epoch_id,
            saved_at: Utc::now(),
            frontier,
        }
    }
}
