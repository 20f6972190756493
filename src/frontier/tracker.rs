//! Domain State Tracker
//!
//! Holds one [`DomainState`] per domain behind its own mutex. The map only
//! hands out `Arc`s to the per-domain locks, so work on one domain never
//! waits on another.

use crate::config::CircuitBreakerConfig;
use crate::state::{Admission, CircuitStatus, DomainSnapshot, DomainState};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Circuit transitions kept for the metrics surface
const TRANSITION_LOG_CAPACITY: usize = 256;

/// One recorded circuit breaker state change
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitTransition {
    pub domain: String,
    pub from: CircuitStatus,
    pub to: CircuitStatus,
    pub at: DateTime<Utc>,
}

/// Which per-domain counter to bump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainCounter {
    Completed,
    DeadLettered,
    Retried,
}

/// Read-only view of one domain for metrics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainView {
    pub min_interval: Duration,
    pub circuit: CircuitStatus,
    pub leases: u64,
    pub completed: u64,
    pub dead_lettered: u64,
    pub retries: u64,
}

pub struct DomainTracker {
    domains: DashMap<String, Arc<Mutex<DomainState>>>,
    default_min_interval: Duration,
    breaker: CircuitBreakerConfig,
    transitions: Mutex<VecDeque<CircuitTransition>>,
}

fn lock_state(state: &Mutex<DomainState>) -> MutexGuard<'_, DomainState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DomainTracker {
    pub fn new(default_min_interval: Duration, breaker: CircuitBreakerConfig) -> Self {
        Self {
            domains: DashMap::new(),
            default_min_interval,
            breaker,
            transitions: Mutex::new(VecDeque::new()),
        }
    }

    fn entry(&self, domain: &str) -> Arc<Mutex<DomainState>> {
        if let Some(state) = self.domains.get(domain) {
            return Arc::clone(state.value());
        }
        let state = self
            .domains
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(DomainState::new(self.default_min_interval))));
        Arc::clone(state.value())
    }

    /// Runs `f` on the domain's state under its lock, recording any circuit transition
    fn update<R>(&self, domain: &str, f: impl FnOnce(&mut DomainState, &CircuitBreakerConfig) -> R) -> R {
        let entry = self.entry(domain);
        let mut state = lock_state(&entry);
        let before = state.circuit.status();
        let result = f(&mut state, &self.breaker);
        let after = state.circuit.status();
        drop(state);

        if before != after {
            self.record_transition(domain, before, after);
        }
        result
    }

    fn record_transition(&self, domain: &str, from: CircuitStatus, to: CircuitStatus) {
        match to {
            CircuitStatus::Open => warn!(domain, %from, "Circuit opened"),
            _ => info!(domain, %from, %to, "Circuit transition"),
        }

        let mut log = self
            .transitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if log.len() == TRANSITION_LOG_CAPACITY {
            log.pop_front();
        }
        log.push_back(CircuitTransition {
            domain: domain.to_string(),
            from,
            to,
            at: Utc::now(),
        });
    }

    /// Registers a domain, raising its pacing to `min_interval` when longer
    ///
    /// The effective interval never drops below the configured default.
    pub fn configure(&self, domain: &str, min_interval: Option<Duration>) {
        if let Some(interval) = min_interval {
            self.update(domain, |state, _| state.raise_min_interval(interval));
        } else {
            self.entry(domain);
        }
    }

    /// Atomically checks pacing and circuit state and records a lease
    pub fn try_acquire(&self, domain: &str, now: Instant) -> Option<Admission> {
        self.update(domain, |state, breaker| state.try_acquire(breaker, now))
    }

    /// Peeks whether a lease would be admitted at `now`
    pub fn can_lease(&self, domain: &str, now: Instant) -> bool {
        match self.domains.get(domain) {
            Some(entry) => lock_state(entry.value()).can_lease(&self.breaker, now),
            None => true,
        }
    }

    /// Holds off the next lease for `domain` until `until`
    pub fn defer(&self, domain: &str, until: Instant) {
        self.update(domain, |state, _| state.defer(until));
    }

    pub fn record_success(&self, domain: &str) {
        self.update(domain, |state, _| state.circuit.record_success());
    }

    pub fn record_failure(&self, domain: &str, now: Instant) {
        self.update(domain, |state, breaker| state.circuit.record_failure(breaker, now));
    }

    /// Returns a half-open probe slot whose lease ended without an outcome
    pub fn release_probe(&self, domain: &str) {
        self.update(domain, |state, _| state.circuit.release_probe());
    }

    pub fn count(&self, domain: &str, counter: DomainCounter) {
        self.update(domain, |state, _| match counter {
            DomainCounter::Completed => state.completed += 1,
            DomainCounter::DeadLettered => state.dead_lettered += 1,
            DomainCounter::Retried => state.retries += 1,
        });
    }

    pub fn status(&self, domain: &str) -> Option<CircuitStatus> {
        self.domains
            .get(domain)
            .map(|entry| lock_state(entry.value()).circuit.status())
    }

    /// Time until pacing next allows a lease; None if now or unknown domain
    pub fn time_until_ready(&self, domain: &str, now: Instant) -> Option<Duration> {
        self.domains
            .get(domain)
            .and_then(|entry| lock_state(entry.value()).time_until_next_lease(now))
    }

    /// Most recent transitions, newest last
    pub fn transitions(&self, limit: usize) -> Vec<CircuitTransition> {
        let log = self
            .transitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let skip = log.len().saturating_sub(limit);
        log.iter().skip(skip).cloned().collect()
    }

    pub fn views(&self) -> BTreeMap<String, DomainView> {
        self.domains
            .iter()
            .map(|entry| {
                let state = lock_state(entry.value());
                let view = DomainView {
                    min_interval: state.min_interval,
                    circuit: state.circuit.status(),
                    leases: state.leases,
                    completed: state.completed,
                    dead_lettered: state.dead_lettered,
                    retries: state.retries,
                };
                (entry.key().clone(), view)
            })
            .collect()
    }

    pub fn snapshot(&self, now: Instant) -> BTreeMap<String, DomainSnapshot> {
        self.domains
            .iter()
            .map(|entry| (entry.key().clone(), lock_state(entry.value()).snapshot(now)))
            .collect()
    }

    /// Replaces all domain state; the configured default still floors pacing
    pub fn restore(&self, snapshot: &BTreeMap<String, DomainSnapshot>, now: Instant) {
        self.domains.clear();
        for (domain, saved) in snapshot {
            let mut state = DomainState::restore(saved, now);
            state.raise_min_interval(self.default_min_interval);
            self.domains
                .insert(domain.clone(), Arc::new(Mutex::new(state)));
        }
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}
