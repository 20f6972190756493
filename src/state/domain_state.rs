use crate::config::CircuitBreakerConfig;
use crate::state::circuit::{Admission, CircuitBreaker, CircuitSnapshot};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Tracks pacing and health for one domain
///
/// The pacing check and the `last_lease_at` update happen together in
/// [`DomainState::try_acquire`], which the tracker calls under the domain's
/// lock. Splitting them would let two workers pass the check in the same
/// window.
#[derive(Debug, Clone)]
pub struct DomainState {
    /// Minimum time between two leases for this domain
    pub min_interval: Duration,

    /// When the most recent lease was granted
    pub last_lease_at: Option<Instant>,

    /// No lease before this point (server retry hints, restored pacing)
    pub deferred_until: Option<Instant>,

    pub circuit: CircuitBreaker,

    /// Leases granted
    pub leases: u64,

    /// Jobs acknowledged
    pub completed: u64,

    /// Jobs moved to the dead-letter store
    pub dead_lettered: u64,

    /// Failures that were requeued for another attempt
    pub retries: u64,
}

/// Serializable form of [`DomainState`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainSnapshot {
    pub min_interval_ms: u64,

    /// Time left before the domain may be leased again
    pub next_lease_in_ms: u64,

    pub circuit: CircuitSnapshot,

    #[serde(default)]
    pub leases: u64,
    #[serde(default)]
    pub completed: u64,
    #[serde(default)]
    pub dead_lettered: u64,
    #[serde(default)]
    pub retries: u64,
}

impl DomainState {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_lease_at: None,
            deferred_until: None,
            circuit: CircuitBreaker::new(),
            leases: 0,
            completed: 0,
            dead_lettered: 0,
            retries: 0,
        }
    }

    /// Earliest instant at which pacing allows another lease
    pub fn ready_at(&self) -> Option<Instant> {
        let paced = self.last_lease_at.map(|last| last + self.min_interval);
        match (paced, self.deferred_until) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    /// Calculates the time until pacing allows the next lease
    ///
    /// Returns None if a lease can be granted now.
    pub fn time_until_next_lease(&self, now: Instant) -> Option<Duration> {
        match self.ready_at() {
            Some(ready) if ready > now => Some(ready - now),
            _ => None,
        }
    }

    /// Checks pacing and circuit state without changing anything
    pub fn can_lease(&self, config: &CircuitBreakerConfig, now: Instant) -> bool {
        self.time_until_next_lease(now).is_none() && self.circuit.can_lease(config, now)
    }

    /// Checks pacing and circuit state and, if both allow it, records the lease
    pub fn try_acquire(
        &mut self,
        config: &CircuitBreakerConfig,
        now: Instant,
    ) -> Option<Admission> {
        if self.time_until_next_lease(now).is_some() {
            return None;
        }
        let admission = self.circuit.try_acquire(config, now)?;
        self.last_lease_at = Some(now);
        self.leases += 1;
        Some(admission)
    }

    /// Pushes the next permissible lease out to at least `until`
    pub fn defer(&mut self, until: Instant) {
        self.deferred_until = Some(match self.deferred_until {
            Some(existing) => existing.max(until),
            None => until,
        });
    }

    /// Raises the pacing interval; a directive never shortens configured pacing
    pub fn raise_min_interval(&mut self, min_interval: Duration) {
        if min_interval > self.min_interval {
            self.min_interval = min_interval;
        }
    }

    pub fn snapshot(&self, now: Instant) -> DomainSnapshot {
        let wait = self.time_until_next_lease(now).unwrap_or_default();
        DomainSnapshot {
            min_interval_ms: self.min_interval.as_millis() as u64,
            next_lease_in_ms: wait.as_millis() as u64,
            circuit: self.circuit.snapshot(now),
            leases: self.leases,
            completed: self.completed,
            dead_lettered: self.dead_lettered,
            retries: self.retries,
        }
    }

    pub fn restore(snapshot: &DomainSnapshot, now: Instant) -> Self {
        let deferred_until = if snapshot.next_lease_in_ms > 0 {
            Some(now + Duration::from_millis(snapshot.next_lease_in_ms))
        } else {
            None
        };
        Self {
            min_interval: Duration::from_millis(snapshot.min_interval_ms),
            last_lease_at: None,
            deferred_until,
            circuit: CircuitBreaker::restore(snapshot.circuit, now),
            leases: snapshot.leases,
            completed: snapshot.completed,
            dead_lettered: snapshot.dead_lettered,
            retries: snapshot.retries,
        }
    }
}
