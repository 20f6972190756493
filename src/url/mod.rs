//! URL handling module for Harvest-Frontier
//!
//! Canonical URL forms for the seen-set, domain extraction for pacing, and
//! wildcard domain patterns for configuration.

mod domain;
mod matcher;
mod normalize;

pub use domain::{extract_domain, CanonicalUrl};
pub use matcher::{matches_wildcard, DomainPattern};
pub use normalize::normalize_url;
