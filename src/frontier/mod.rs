//! The shared crawl frontier
//!
//! # Components
//!
//! - `SeenSet`: canonical URLs admitted this epoch
//! - `DomainTracker`: per-domain pacing and circuit breakers
//! - `JobQueue`: priority queue with leases, retries and dead-lettering
//! - `Backoff`: retry delay calculation
//! - `DeadLetterStore`: durable home of jobs that will not be retried

mod backoff;
mod dead_letter;
mod queue;
mod seen_set;
mod tracker;

pub use backoff::Backoff;
pub use dead_letter::DeadLetterStore;
pub use queue::{EnqueueOutcome, FailOutcome, FrontierSnapshot, JobQueue, PendingJob, QueueSettings};
pub use seen_set::{SeenRecord, SeenSet};
pub use tracker::{CircuitTransition, DomainCounter, DomainTracker, DomainView};
