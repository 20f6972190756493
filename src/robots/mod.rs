//! Politeness directive sources
//!
//! The frontier asks a [`PolitenessSource`] about every URL at admission
//! time: may it be crawled at all, and how far apart must leases for its
//! domain be. The frontier itself never parses a directive format.
//!
//! # Components
//!
//! - `ConfigPolicy`: deny list and per-domain pacing overrides from configuration
//! - `RobotsDirectory`: robots.txt rules per host, fetched ahead of admission
//! - `PolicyChain`: combines several sources (all must allow; longest interval wins)

mod directory;
mod parser;

pub use directory::RobotsDirectory;
pub use parser::ParsedRobots;

use crate::config::Config;
use crate::url::DomainPattern;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Admission decision for one URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolitenessDirective {
    pub allowed: bool,

    /// Pacing the domain needs beyond the configured default
    pub min_interval: Option<Duration>,
}

impl PolitenessDirective {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            min_interval: None,
        }
    }

    pub fn deny() -> Self {
        Self {
            allowed: false,
            min_interval: None,
        }
    }

    pub fn with_min_interval(mut self, interval: Option<Duration>) -> Self {
        self.min_interval = interval;
        self
    }

    /// Combines two directives: both must allow, the longer interval wins
    pub fn merge(self, other: Self) -> Self {
        Self {
            allowed: self.allowed && other.allowed,
            min_interval: match (self.min_interval, other.min_interval) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            },
        }
    }
}

/// Supplies admission decisions and pacing for URLs
pub trait PolitenessSource: Send + Sync {
    fn directive(&self, url: &Url, domain: &str) -> PolitenessDirective;
}

/// Admits everything with no extra pacing
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl PolitenessSource for AllowAll {
    fn directive(&self, _url: &Url, _domain: &str) -> PolitenessDirective {
        PolitenessDirective::allow()
    }
}

/// Deny list and pacing overrides from configuration
#[derive(Debug, Clone, Default)]
pub struct ConfigPolicy {
    deny: Vec<DomainPattern>,
    pacing: Vec<(DomainPattern, Duration)>,
}

impl ConfigPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            deny: config
                .deny
                .iter()
                .map(|entry| DomainPattern::parse(&entry.domain))
                .collect(),
            pacing: config
                .politeness
                .domain
                .iter()
                .map(|entry| {
                    (
                        DomainPattern::parse(&entry.domain),
                        Duration::from_millis(entry.min_interval_ms),
                    )
                })
                .collect(),
        }
    }

    pub fn deny(mut self, pattern: &str) -> Self {
        self.deny.push(DomainPattern::parse(pattern));
        self
    }

    pub fn pace(mut self, pattern: &str, interval: Duration) -> Self {
        self.pacing.push((DomainPattern::parse(pattern), interval));
        self
    }
}

impl PolitenessSource for ConfigPolicy {
    fn directive(&self, _url: &Url, domain: &str) -> PolitenessDirective {
        if self.deny.iter().any(|pattern| pattern.matches(domain)) {
            return PolitenessDirective::deny();
        }
        let interval = self
            .pacing
            .iter()
            .filter(|(pattern, _)| pattern.matches(domain))
            .map(|(_, interval)| *interval)
            .max();
        PolitenessDirective::allow().with_min_interval(interval)
    }
}

/// Asks every source in turn and merges the answers
#[derive(Clone, Default)]
pub struct PolicyChain {
    sources: Vec<Arc<dyn PolitenessSource>>,
}

impl PolicyChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: Arc<dyn PolitenessSource>) -> Self {
        self.sources.push(source);
        self
    }
}

impl PolitenessSource for PolicyChain {
    fn directive(&self, url: &Url, domain: &str) -> PolitenessDirective {
        let mut combined = PolitenessDirective::allow();
        for source in &self.sources {
            combined = combined.merge(source.directive(url, domain));
            if !combined.allowed {
                break;
            }
        }
        combined
    }
}
