use crate::config::types::{
    CheckpointConfig, CircuitBreakerConfig, Config, CoordinatorConfig, DomainEntry,
    PolitenessConfig, RetryConfig, SeedEntry, StorageConfig, UserAgentConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_coordinator_config(&config.coordinator)?;
    validate_politeness_config(&config.politeness)?;
    validate_retry_config(&config.retry)?;
    validate_circuit_breaker_config(&config.circuit_breaker)?;
    validate_checkpoint_config(&config.checkpoint)?;
    validate_storage_config(&config.storage)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_seeds(&config.seed)?;
    validate_deny_domains(&config.deny)?;
    Ok(())
}

fn require_positive(name: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Validation(format!(
            "{} must be greater than 0",
            name
        )));
    }
    Ok(())
}

/// Validates worker pool and lease configuration
fn validate_coordinator_config(config: &CoordinatorConfig) -> Result<(), ConfigError> {
    if config.workers < 1 || config.workers > 256 {
        return Err(ConfigError::Validation(format!(
            "workers must be between 1 and 256, got {}",
            config.workers
        )));
    }

    require_positive("lease_timeout_secs", config.lease_timeout_secs)?;
    require_positive("shutdown_grace_secs", config.shutdown_grace_secs)?;
    require_positive("fetch_timeout_secs", config.fetch_timeout_secs)?;
    require_positive("idle_poll_ms", config.idle_poll_ms)?;
    require_positive("reaper_interval_ms", config.reaper_interval_ms)?;

    if config.discovered_priority_step < 0 {
        return Err(ConfigError::Validation(format!(
            "discovered_priority_step must be >= 0, got {}",
            config.discovered_priority_step
        )));
    }

    Ok(())
}

/// Validates pacing defaults and overrides
fn validate_politeness_config(config: &PolitenessConfig) -> Result<(), ConfigError> {
    for entry in &config.domain {
        validate_domain_pattern(&entry.domain)?;
    }
    Ok(())
}

/// Validates retry configuration
fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(
            "max_attempts must be >= 1".to_string(),
        ));
    }

    if config.base_delay_ms > config.max_delay_ms {
        return Err(ConfigError::Validation(format!(
            "base_delay_ms ({}) must not exceed max_delay_ms ({})",
            config.base_delay_ms, config.max_delay_ms
        )));
    }

    Ok(())
}

/// Validates circuit breaker configuration
fn validate_circuit_breaker_config(config: &CircuitBreakerConfig) -> Result<(), ConfigError> {
    if config.failure_threshold < 1 {
        return Err(ConfigError::Validation(
            "failure_threshold must be >= 1".to_string(),
        ));
    }

    require_positive("recovery_timeout_secs", config.recovery_timeout_secs)?;

    if config.half_open_max_concurrent < 1 {
        return Err(ConfigError::Validation(
            "half_open_max_concurrent must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates checkpoint cadence
fn validate_checkpoint_config(config: &CheckpointConfig) -> Result<(), ConfigError> {
    require_positive("every_jobs", config.every_jobs)?;
    require_positive("interval_secs", config.interval_secs)?;

    if let Some(path) = &config.path {
        if path.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "checkpoint path cannot be empty".to_string(),
            ));
        }
    }

    Ok(())
}

/// Validates storage configuration
fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    if config.records_path.is_empty() {
        return Err(ConfigError::Validation(
            "records_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // Validate crawler name: non-empty, alphanumeric + hyphens only
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    // Validate contact URL
    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    // Validate contact email (basic validation)
    validate_email(&config.contact_email)?;

    Ok(())
}

/// Validates seed entries
fn validate_seeds(seeds: &[SeedEntry]) -> Result<(), ConfigError> {
    for entry in seeds {
        if entry.urls.is_empty() {
            return Err(ConfigError::Validation(
                "Each [[seed]] entry must list at least one URL".to_string(),
            ));
        }

        for seed in &entry.urls {
            let url = Url::parse(seed).map_err(|e| {
                ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", seed, e))
            })?;

            if url.scheme() != "https" && url.scheme() != "http" {
                return Err(ConfigError::Validation(format!(
                    "Seed URL '{}' must use HTTP or HTTPS",
                    seed
                )));
            }
        }
    }

    Ok(())
}

/// Validates deny list entries
fn validate_deny_domains(domains: &[DomainEntry]) -> Result<(), ConfigError> {
    for entry in domains {
        validate_domain_pattern(&entry.domain)?;
    }
    Ok(())
}

/// Validates a domain pattern (supports wildcards)
fn validate_domain_pattern(pattern: &str) -> Result<(), ConfigError> {
    if pattern.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain pattern cannot be empty".to_string(),
        ));
    }

    // Check if it's a wildcard pattern
    if let Some(domain) = pattern.strip_prefix("*.") {
        // Validate the base domain part
        validate_domain_string(domain)?;
    } else {
        // Regular domain
        validate_domain_string(pattern)?;
    }

    Ok(())
}

/// Validates a domain string (without wildcard prefix)
fn validate_domain_string(domain: &str) -> Result<(), ConfigError> {
    if domain.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain cannot be empty".to_string(),
        ));
    }

    // Check for invalid characters
    if !domain
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' contains invalid characters",
            domain
        )));
    }

    // Check that it doesn't start or end with a dot or hyphen
    if domain.starts_with('.')
        || domain.ends_with('.')
        || domain.starts_with('-')
        || domain.ends_with('-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot start or end with '.' or '-'",
            domain
        )));
    }

    // Check for consecutive dots
    if domain.contains("..") {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot contain consecutive dots",
            domain
        )));
    }

    // Must contain at least one dot (e.g., example.com, not just "example")
    if !domain.contains('.') {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' must contain at least one dot (e.g., 'example.com')",
            domain
        )));
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact_email cannot be empty".to_string(),
        ));
    }

    // Basic email format check: must contain @ and have text on both sides
    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    let local = parts[0];
    let domain = parts[1];

    if local.is_empty() || domain.is_empty() {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    // Domain part should contain at least one dot
    if !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
