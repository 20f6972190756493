//! Per-domain circuit breaker
//!
//! The breaker is a small finite-state machine. It never reads the clock
//! itself: every call that depends on time takes `now`, which keeps the
//! transitions deterministic under test.

use crate::config::CircuitBreakerConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Live breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation; counts failures in a row
    Closed { consecutive_failures: u32 },

    /// Leases are refused until `until`
    Open { until: Instant },

    /// A bounded number of probe leases may be outstanding
    HalfOpen { probes_in_flight: u32 },
}

/// State tag without the embedded bookkeeping, for metrics and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        }
    }
}

impl fmt::Display for CircuitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a lease was admitted by the breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit closed; ordinary lease
    Normal,

    /// Circuit half-open; the lease counts against the probe budget
    Probe,
}

/// Serializable form of the breaker
///
/// `Instant`s cannot leave the process, so an open circuit stores the time
/// left until recovery and is rebuilt relative to the restore time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CircuitSnapshot {
    Closed { consecutive_failures: u32 },
    Open { recovery_remaining_ms: u64 },
    HalfOpen,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreaker {
    state: CircuitState,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self {
            state: CircuitState::Closed {
                consecutive_failures: 0,
            },
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn status(&self) -> CircuitStatus {
        match self.state {
            CircuitState::Closed { .. } => CircuitStatus::Closed,
            CircuitState::Open { .. } => CircuitStatus::Open,
            CircuitState::HalfOpen { .. } => CircuitStatus::HalfOpen,
        }
    }

    /// Checks whether a lease would be admitted at `now` without changing state
    ///
    /// An open circuit whose recovery timeout has elapsed reports `true`,
    /// since the next `try_acquire` would move it to half-open and admit a probe.
    pub fn can_lease(&self, config: &CircuitBreakerConfig, now: Instant) -> bool {
        match self.state {
            CircuitState::Closed { .. } => true,
            CircuitState::Open { until } => {
                now >= until && config.half_open_max_concurrent > 0
            }
            CircuitState::HalfOpen { probes_in_flight } => {
                probes_in_flight < config.half_open_max_concurrent
            }
        }
    }

    /// Admits a lease if the circuit allows one, reserving a probe slot when half-open
    pub fn try_acquire(&mut self, config: &CircuitBreakerConfig, now: Instant) -> Option<Admission> {
        match self.state {
            CircuitState::Closed { .. } => Some(Admission::Normal),
            CircuitState::Open { until } => {
                if now < until || config.half_open_max_concurrent == 0 {
                    return None;
                }
                self.state = CircuitState::HalfOpen { probes_in_flight: 1 };
                Some(Admission::Probe)
            }
            CircuitState::HalfOpen { probes_in_flight } => {
                if probes_in_flight >= config.half_open_max_concurrent {
                    return None;
                }
                self.state = CircuitState::HalfOpen {
                    probes_in_flight: probes_in_flight + 1,
                };
                Some(Admission::Probe)
            }
        }
    }

    /// Records a response from the domain
    ///
    /// Closes a half-open circuit and resets the failure streak of a closed one.
    /// An open circuit only recovers through a probe, so a straggling success
    /// from a lease granted before it opened leaves it open.
    pub fn record_success(&mut self) {
        match self.state {
            CircuitState::Closed { .. } | CircuitState::HalfOpen { .. } => {
                self.state = CircuitState::Closed {
                    consecutive_failures: 0,
                };
            }
            CircuitState::Open { .. } => {}
        }
    }

    /// Records a failure; the recovery timeout restarts from `now`
    pub fn record_failure(&mut self, config: &CircuitBreakerConfig, now: Instant) {
        let reopen = CircuitState::Open {
            until: now + config.recovery_timeout(),
        };
        self.state = match self.state {
            CircuitState::Closed {
                consecutive_failures,
            } => {
                let failures = consecutive_failures.saturating_add(1);
                if failures >= config.failure_threshold {
                    reopen
                } else {
                    CircuitState::Closed {
                        consecutive_failures: failures,
                    }
                }
            }
            CircuitState::Open { .. } | CircuitState::HalfOpen { .. } => reopen,
        };
    }

    /// Returns a probe slot without an outcome (lease expired or was force-failed)
    pub fn release_probe(&mut self) {
        if let CircuitState::HalfOpen { probes_in_flight } = self.state {
            self.state = CircuitState::HalfOpen {
                probes_in_flight: probes_in_flight.saturating_sub(1),
            };
        }
    }

    pub fn snapshot(&self, now: Instant) -> CircuitSnapshot {
        match self.state {
            CircuitState::Closed {
                consecutive_failures,
            } => CircuitSnapshot::Closed {
                consecutive_failures,
            },
            CircuitState::Open { until } => CircuitSnapshot::Open {
                recovery_remaining_ms: until.saturating_duration_since(now).as_millis() as u64,
            },
            CircuitState::HalfOpen { .. } => CircuitSnapshot::HalfOpen,
        }
    }

    /// Rebuilds a breaker from a snapshot
    ///
    /// Probes cannot survive a restart (their leases return to pending), so a
    /// half-open circuit comes back with no probes in flight.
    pub fn restore(snapshot: CircuitSnapshot, now: Instant) -> Self {
        let state = match snapshot {
            CircuitSnapshot::Closed {
                consecutive_failures,
            } => CircuitState::Closed {
                consecutive_failures,
            },
            CircuitSnapshot::Open {
                recovery_remaining_ms,
            } => CircuitState::Open {
                until: now + Duration::from_millis(recovery_remaining_ms),
            },
            CircuitSnapshot::HalfOpen => CircuitState::HalfOpen { probes_in_flight: 0 },
        };
        Self { state }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}
