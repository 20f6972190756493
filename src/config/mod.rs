//! Configuration module for Harvest-Frontier
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use harvest_frontier::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("frontier.toml")).unwrap();
//! println!("Workers: {}", config.coordinator.workers);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    CheckpointConfig, CircuitBreakerConfig, Config, CoordinatorConfig, DomainEntry, DomainPacing,
    PolitenessConfig, RetryConfig, SeedEntry, StorageConfig, UserAgentConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
