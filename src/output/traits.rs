//! Record sink trait and types
//!
//! Parsed records leave the frontier through a [`RecordSink`]. The sink is
//! a collaborator: the frontier never reads back what it wrote.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while writing records
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Failed to write record: {0}")]
    Write(String),

    #[error("Failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for sink operations
pub type SinkResult<T> = Result<T, SinkError>;

/// One record extracted from a fetched page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlRecord {
    pub job_id: u64,
    pub url: String,
    pub domain: String,
    pub depth: u32,

    /// HTTP status of the fetch that produced the record
    pub status: u16,

    pub fetched_at: DateTime<Utc>,

    /// Whatever the parser extracted
    pub data: serde_json::Value,
}

/// Destination for scraped records
///
/// A failed write is reported back as a transient job failure, so the job
/// is retried rather than acknowledged with its record lost.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn write(&self, record: &CrawlRecord) -> SinkResult<()>;

    /// Flushes buffered records; called once at shutdown
    async fn flush(&self) -> SinkResult<()> {
        Ok(())
    }
}
