/// A domain pattern from configuration
///
/// `example.com` matches only that host. `*.example.com` matches the bare
/// domain and any subdomain at any depth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainPattern {
    Exact(String),
    Subtree(String),
}

impl DomainPattern {
    pub fn parse(pattern: &str) -> Self {
        let pattern = pattern.trim().to_lowercase();
        match pattern.strip_prefix("*.") {
            Some(base) => Self::Subtree(base.to_string()),
            None => Self::Exact(pattern),
        }
    }

    pub fn matches(&self, candidate: &str) -> bool {
        match self {
            Self::Exact(domain) => candidate.eq_ignore_ascii_case(domain),
            Self::Subtree(base) => {
                let candidate = candidate.to_ascii_lowercase();
                candidate == *base
                    || candidate
                        .strip_suffix(base.as_str())
                        .map_or(false, |prefix| prefix.ends_with('.'))
            }
        }
    }
}

/// Checks if a domain matches a wildcard pattern
///
/// # Examples
///
/// ```
/// use harvest_frontier::url::matches_wildcard;
///
/// assert!(matches_wildcard("example.com", "example.com"));
/// assert!(!matches_wildcard("example.com", "blog.example.com"));
/// assert!(matches_wildcard("*.example.com", "example.com"));
/// assert!(matches_wildcard("*.example.com", "api.v2.example.com"));
/// assert!(!matches_wildcard("*.example.com", "badexample.com"));
/// ```
pub fn matches_wildcard(pattern: &str, candidate: &str) -> bool {
    DomainPattern::parse(pattern).matches(candidate)
}
