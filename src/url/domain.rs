use crate::url::normalize::normalize_url;
use crate::UrlError;
use std::fmt;
use url::Url;

/// A normalized URL together with the domain it is paced under
///
/// The domain is the lowercase host without port. All leases for URLs that
/// share a host share one pacing interval and one circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalUrl {
    url: Url,
    domain: String,
}

impl CanonicalUrl {
    /// Normalizes `raw` and derives its domain
    pub fn parse(raw: &str) -> Result<Self, UrlError> {
        let url = normalize_url(raw)?;
        let domain = extract_domain(&url).ok_or(UrlError::MissingDomain)?;
        Ok(Self { url, domain })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn into_parts(self) -> (Url, String) {
        (self.url, self.domain)
    }
}

impl fmt::Display for CanonicalUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

/// Extracts the lowercase host of a URL
///
/// # Examples
///
/// ```
/// use url::Url;
/// use harvest_frontier::url::extract_domain;
///
/// let url = Url::parse("https://Blog.Example.com:8080/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("blog.example.com".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}
