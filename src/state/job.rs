/// Job definitions for tracking crawl work through the frontier
///
/// This module defines the unit of crawl work, its lifecycle states, and the
/// failure taxonomy reported back by workers.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Identifier of a worker holding a lease
pub type WorkerId = usize;

/// Unique job identifier, assigned at enqueue time
///
/// Identifiers increase monotonically within a crawl epoch and survive
/// checkpoint/restore, so they stay unique across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(JobId)
    }
}

/// Represents the current state of a job in the frontier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    // ===== Active States =====
    /// Job is waiting to be leased
    Pending,

    /// Job is held by exactly one worker
    Leased,

    /// Job's last attempt failed and it is waiting out its retry delay.
    /// It is pending in every respect except eligibility.
    Failed,

    // ===== Terminal States =====
    /// Job was fetched and parsed successfully
    Completed,

    /// Job exhausted its retries or failed permanently
    DeadLettered,
}

impl JobState {
    /// Returns true if this is a terminal state (no further processing needed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::DeadLettered)
    }

    /// Returns true if the job sits in the pending index (ready or backing off)
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending | Self::Failed)
    }

    /// Converts the job state to a database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Leased => "leased",
            Self::Failed => "failed",
            Self::Completed => "completed",
            Self::DeadLettered => "dead_lettered",
        }
    }

    /// Parses a job state from a database string representation
    ///
    /// Returns None if the string doesn't match any known state.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "leased" => Some(Self::Leased),
            "failed" => Some(Self::Failed),
            "completed" => Some(Self::Completed),
            "dead_lettered" => Some(Self::DeadLettered),
            _ => None,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// Failure classes reported by the fetch and parse collaborators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Timeout, connection reset, 429, 5xx
    Transient,

    /// 404, 410, 401/403, malformed URL
    Permanent,

    /// Parse failure or unexpected content shape
    Structural,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::Structural => "structural",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure report for a leased job
///
/// Carries the error kind, whether a retry is worthwhile, and an optional
/// server-supplied retry hint (e.g. `Retry-After`).
#[derive(Debug, Clone, PartialEq)]
pub struct JobFailure {
    pub kind: ErrorKind,
    pub retryable: bool,
    pub message: String,
    pub retry_after: Option<Duration>,
}

impl JobFailure {
    /// A transient failure; always retryable
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            retryable: true,
            message: message.into(),
            retry_after: None,
        }
    }

    /// A permanent failure; never retried
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Permanent,
            retryable: false,
            message: message.into(),
            retry_after: None,
        }
    }

    /// A structural failure; permanent unless the parser flags it retryable
    pub fn structural(message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind: ErrorKind::Structural,
            retryable,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// One entry in a job's failure history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    pub attempt: u32,
    pub kind: ErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// A unit of crawl work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,

    /// Normalized target URL
    pub url: String,

    /// Domain derived from `url`; the pacing and circuit-breaker partition key
    pub domain: String,

    /// Lower value is served first
    pub priority: i32,

    /// Link distance from the seed that led here
    pub depth: u32,

    /// Number of leases granted so far
    pub attempts: u32,

    pub state: JobState,
    pub enqueued_at: DateTime<Utc>,
    pub leased_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub leased_by: Option<WorkerId>,

    pub last_error: Option<String>,

    /// Full failure history, oldest first
    #[serde(default)]
    pub errors: Vec<JobError>,
}

impl Job {
    /// Creates a new pending job
    pub fn new(id: JobId, url: String, domain: String, priority: i32, depth: u32) -> Self {
        Self {
            id,
            url,
            domain,
            priority,
            depth,
            attempts: 0,
            state: JobState::Pending,
            enqueued_at: Utc::now(),
            leased_at: None,
            leased_by: None,
            last_error: None,
            errors: Vec::new(),
        }
    }

    /// Appends a failure to the job's history
    pub fn record_error(&mut self, kind: ErrorKind, message: &str) {
        self.last_error = Some(format!("{}: {}", kind, message));
        self.errors.push(JobError {
            attempt: self.attempts,
            kind,
            message: message.to_string(),
            at: Utc::now(),
        });
    }
}
