//! Harvest-Frontier: crawl coordination core
//!
//! This crate implements the shared frontier that a pool of concurrent
//! workers crawls from: a deduplicating seen-set, a priority job queue with
//! retries and dead-lettering, per-domain pacing and circuit breaking, and
//! crash-safe checkpointing.

pub mod checkpoint;
pub mod config;
pub mod crawler;
pub mod frontier;
pub mod output;
pub mod robots;
pub mod state;
pub mod storage;
pub mod url;

use state::{JobId, JobState};
use thiserror::Error;

/// Main error type for Harvest-Frontier operations
#[derive(Debug, Error)]
pub enum FrontierError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Record sink error: {0}")]
    Sink(#[from] output::SinkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Worker task failed: {0}")]
    Task(String),
}

impl FrontierError {
    /// Infrastructure failures that must stop the coordinator
    ///
    /// Continuing without durable dead letters or checkpoints risks silent
    /// duplicate work or unbounded loss on crash.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Storage(_) | Self::Task(_) => true,
            Self::Queue(err) => err.is_fatal(),
            _ => false,
        }
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid domain pattern: {0}")]
    InvalidPattern(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,
}

/// Job queue errors
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Unknown job: {0}")]
    UnknownJob(JobId),

    #[error("Job {id} is {state}, not leased")]
    NotLeased { id: JobId, state: JobState },

    #[error("Job {0} is not in the dead-letter store")]
    NotDeadLettered(JobId),

    #[error("Job {0} is already in the queue")]
    AlreadyQueued(JobId),

    #[error("Dead-letter storage failed: {0}")]
    Storage(#[from] storage::StorageError),
}

impl QueueError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

/// Result type alias for Harvest-Frontier operations
pub type Result<T> = std::result::Result<T, FrontierError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

/// Result type alias for queue operations
pub type QueueResult<T> = std::result::Result<T, QueueError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::Coordinator;
pub use frontier::{JobQueue, SeenSet};
pub use state::{Job, JobFailure};
pub use url::{normalize_url, CanonicalUrl};
