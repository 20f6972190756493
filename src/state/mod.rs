//! State module for jobs and per-domain health
//!
//! # Components
//!
//! - `Job`: A unit of crawl work and its lifecycle (`JobState`)
//! - `JobFailure`: The failure report a worker hands back for a leased job
//! - `DomainState`: Per-domain pacing, counters, and the embedded circuit breaker
//! - `CircuitBreaker`: Closed / open / half-open state machine

mod circuit;
mod domain_state;
mod job;

// Re-export main types
pub use circuit::{Admission, CircuitBreaker, CircuitSnapshot, CircuitState, CircuitStatus};
pub use domain_state::{DomainSnapshot, DomainState};
pub use job::{ErrorKind, Job, JobError, JobFailure, JobId, JobState, WorkerId};
