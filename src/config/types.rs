use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for Harvest-Frontier
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub politeness: PolitenessConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(rename = "circuit-breaker", default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    pub storage: StorageConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub seed: Vec<SeedEntry>,
    #[serde(default)]
    pub deny: Vec<DomainEntry>,
}

/// Worker pool and lease lifecycle configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Number of concurrent workers
    pub workers: usize,

    /// Seconds a lease may stay unresolved before the reaper reclaims it
    #[serde(rename = "lease-timeout-secs")]
    pub lease_timeout_secs: u64,

    /// Seconds in-flight leases get to finish during shutdown
    #[serde(rename = "shutdown-grace-secs")]
    pub shutdown_grace_secs: u64,

    /// Upper bound for one fetch call
    #[serde(rename = "fetch-timeout-secs")]
    pub fetch_timeout_secs: u64,

    /// Worker back-off when no job is eligible (milliseconds)
    #[serde(rename = "idle-poll-ms")]
    pub idle_poll_ms: u64,

    /// How often expired leases are swept (milliseconds)
    #[serde(rename = "reaper-interval-ms")]
    pub reaper_interval_ms: u64,

    /// Discovered links deeper than this are dropped
    #[serde(rename = "max-depth")]
    pub max_depth: u32,

    /// Priority added to a parent's priority for the links it discovers
    #[serde(rename = "discovered-priority-step")]
    pub discovered_priority_step: i32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            lease_timeout_secs: 300,
            shutdown_grace_secs: 30,
            fetch_timeout_secs: 30,
            idle_poll_ms: 250,
            reaper_interval_ms: 1000,
            max_depth: 3,
            discovered_priority_step: 1,
        }
    }
}

impl CoordinatorConfig {
    pub fn lease_timeout(&self) -> Duration {
        Duration::from_secs(self.lease_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_millis(self.reaper_interval_ms)
    }
}

/// Per-domain pacing configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PolitenessConfig {
    /// Minimum time between two leases for the same domain (milliseconds)
    #[serde(rename = "default-min-interval-ms", default = "default_min_interval_ms")]
    pub default_min_interval_ms: u64,

    /// Domain-specific overrides
    #[serde(default)]
    pub domain: Vec<DomainPacing>,
}

fn default_min_interval_ms() -> u64 {
    1000
}

impl Default for PolitenessConfig {
    fn default() -> Self {
        Self {
            default_min_interval_ms: default_min_interval_ms(),
            domain: Vec::new(),
        }
    }
}

impl PolitenessConfig {
    pub fn default_min_interval(&self) -> Duration {
        Duration::from_millis(self.default_min_interval_ms)
    }
}

/// Pacing override for a domain pattern
#[derive(Debug, Clone, Deserialize)]
pub struct DomainPacing {
    /// Domain pattern (e.g., "example.com" or "*.example.com")
    pub domain: String,

    #[serde(rename = "min-interval-ms")]
    pub min_interval_ms: u64,
}

/// Retry and backoff configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Leases a job may receive before it is dead-lettered
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Backoff base (milliseconds)
    #[serde(rename = "base-delay-ms")]
    pub base_delay_ms: u64,

    /// Backoff cap (milliseconds)
    #[serde(rename = "max-delay-ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 300_000,
        }
    }
}

/// Per-domain circuit breaker configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    #[serde(rename = "failure-threshold")]
    pub failure_threshold: u32,

    /// Seconds after the last failure before probes are allowed
    #[serde(rename = "recovery-timeout-secs")]
    pub recovery_timeout_secs: u64,

    /// Outstanding probe leases allowed while half-open
    #[serde(rename = "half-open-max-concurrent")]
    pub half_open_max_concurrent: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 30,
            half_open_max_concurrent: 1,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }
}

/// Checkpoint cadence configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Save after this many completed jobs
    #[serde(rename = "every-jobs")]
    pub every_jobs: u64,

    /// Save after this many seconds, whichever comes first
    #[serde(rename = "interval-secs")]
    pub interval_secs: u64,

    /// Write checkpoints to this file instead of the database
    pub path: Option<PathBuf>,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            every_jobs: 500,
            interval_secs: 60,
            path: None,
        }
    }
}

impl CheckpointConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Persistence configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Path to the JSON-lines file scraped records are appended to
    #[serde(rename = "records-path")]
    pub records_path: String,
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Format: CrawlerName/Version (+ContactURL; ContactEmail)
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Seed URLs submitted at startup
#[derive(Debug, Clone, Deserialize)]
pub struct SeedEntry {
    #[serde(default)]
    pub priority: i32,

    pub urls: Vec<String>,
}

/// Simple domain entry for the deny list
#[derive(Debug, Clone, Deserialize)]
pub struct DomainEntry {
    /// Domain pattern (e.g., "example.com" or "*.example.com")
    pub domain: String,
}
