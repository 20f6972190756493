//! Frontier metrics
//!
//! Read-only counters per domain plus recent circuit breaker transitions,
//! so an operator can tell an empty queue from a throttled domain.

use crate::frontier::CircuitTransition;
use crate::state::CircuitStatus;
use serde::Serialize;
use std::collections::BTreeMap;

/// Counters for one domain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DomainMetrics {
    /// Jobs ready to lease
    pub pending: u64,

    /// Jobs waiting out a retry delay
    pub waiting: u64,

    pub leased: u64,
    pub completed: u64,
    pub dead_lettered: u64,
    pub retries: u64,
    pub circuit: Option<CircuitStatus>,
    pub min_interval_ms: u64,
}

/// Totals across all domains
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsTotals {
    pub pending: u64,
    pub waiting: u64,
    pub leased: u64,
    pub completed: u64,
    pub dead_lettered: u64,
    pub retries: u64,
    pub open_circuits: u64,
}

/// Point-in-time view of the frontier
#[derive(Debug, Clone, Default, Serialize)]
pub struct FrontierMetrics {
    pub seen_urls: u64,
    pub domains: BTreeMap<String, DomainMetrics>,
    pub totals: MetricsTotals,
    pub transitions: Vec<CircuitTransition>,
    pub leasing_closed: bool,
}

impl FrontierMetrics {
    /// Sums per-domain counters into `totals`
    pub fn compute_totals(&mut self) {
        let mut totals = MetricsTotals::default();
        for domain in self.domains.values() {
            totals.pending += domain.pending;
            totals.waiting += domain.waiting;
            totals.leased += domain.leased;
            totals.completed += domain.completed;
            totals.dead_lettered += domain.dead_lettered;
            totals.retries += domain.retries;
            if domain.circuit == Some(CircuitStatus::Open) {
                totals.open_circuits += 1;
            }
        }
        self.totals = totals;
    }

    /// Share of finished jobs that completed, in percent
    pub fn success_rate(&self) -> f64 {
        let finished = self.totals.completed + self.totals.dead_lettered;
        if finished == 0 {
            0.0
        } else {
            self.totals.completed as f64 / finished as f64 * 100.0
        }
    }
}

/// Prints metrics to stdout in a formatted manner
pub fn print_metrics(metrics: &FrontierMetrics) {
    println!("=== Frontier Metrics ===\n");

    let totals = &metrics.totals;
    println!("Overview:");
    println!("  Seen URLs: {}", metrics.seen_urls);
    println!("  Domains: {}", metrics.domains.len());
    println!("  Pending: {} (+{} waiting to retry)", totals.pending, totals.waiting);
    println!("  Leased: {}", totals.leased);
    println!("  Completed: {}", totals.completed);
    println!("  Dead-lettered: {}", totals.dead_lettered);
    println!("  Retries: {}", totals.retries);
    if metrics.leasing_closed {
        println!("  Leasing: closed");
    }
    println!();

    if !metrics.domains.is_empty() {
        println!("Domains:");
        println!(
            "  {:<32} {:>8} {:>8} {:>7} {:>9} {:>6} {:>7}  circuit",
            "domain", "pending", "waiting", "leased", "completed", "dead", "retries"
        );
        for (domain, m) in &metrics.domains {
            let circuit = m.circuit.map_or("-", |c| c.as_str());
            println!(
                "  {:<32} {:>8} {:>8} {:>7} {:>9} {:>6} {:>7}  {}",
                domain, m.pending, m.waiting, m.leased, m.completed, m.dead_lettered, m.retries, circuit
            );
        }
        println!();
    }

    if totals.open_circuits > 0 {
        println!("Open circuits ({}):", totals.open_circuits);
        for (domain, m) in &metrics.domains {
            if m.circuit == Some(CircuitStatus::Open) {
                println!("  - {}", domain);
            }
        }
        println!();
    }

    if !metrics.transitions.is_empty() {
        println!("Recent circuit transitions:");
        for t in &metrics.transitions {
            println!("  {} {}: {} -> {}", t.at.to_rfc3339(), t.domain, t.from, t.to);
        }
        println!();
    }

    println!(
        "Success Rate: {:.1}% ({} completed / {} finished)",
        metrics.success_rate(),
        totals.completed,
        totals.completed + totals.dead_lettered
    );
}
