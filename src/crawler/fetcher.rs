//! Fetch collaborator and its default HTTP implementation
//!
//! This module handles:
//! - The `Fetcher` boundary the workers call
//! - Building HTTP clients with the crawler's user agent
//! - Classifying HTTP statuses and network errors into retryable,
//!   permanent and structural failures
//! - Reading `Retry-After` hints

use crate::config::UserAgentConfig;
use crate::state::{ErrorKind, JobFailure};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::{redirect::Policy, Client, StatusCode};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Maximum redirects followed per fetch
const MAX_REDIRECTS: usize = 10;

/// A successfully fetched resource
#[derive(Debug, Clone)]
pub struct FetchedContent {
    /// Final URL after redirects
    pub url: Url,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

/// A classified fetch failure
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct FetchError {
    pub kind: ErrorKind,
    pub status: Option<u16>,
    pub message: String,

    /// Server-supplied delay before the next attempt
    pub retry_after: Option<Duration>,
}

impl FetchError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            status: None,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Permanent,
            status: None,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Builds the error for a non-success HTTP status
    pub fn from_status(status: StatusCode, retry_after: Option<Duration>) -> Self {
        Self {
            kind: classify_status(status).unwrap_or(ErrorKind::Permanent),
            status: Some(status.as_u16()),
            message: format!("HTTP {}", status.as_u16()),
            retry_after,
        }
    }

    pub fn retryable(&self) -> bool {
        self.kind == ErrorKind::Transient
    }

    /// Converts into the failure report the queue expects
    pub fn into_failure(self) -> JobFailure {
        JobFailure {
            kind: self.kind,
            retryable: self.retryable(),
            message: self.message,
            retry_after: self.retry_after,
        }
    }
}

/// Fetches raw content for a URL
///
/// Implementations must classify every failure. Retryable means the same
/// request may succeed later (timeouts, resets, 429, 5xx); permanent means
/// it will not (404, 410, 401/403).
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url, timeout: Duration) -> Result<FetchedContent, FetchError>;
}

/// Classifies an HTTP status
///
/// Returns None for success statuses.
///
/// | Status | Class |
/// |--------|-------|
/// | 2xx | success |
/// | 408, 429, 5xx | transient |
/// | 404, 410, 401, 403, other 4xx | permanent |
/// | anything else | permanent |
pub fn classify_status(status: StatusCode) -> Option<ErrorKind> {
    if status.is_success() {
        return None;
    }
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        return Some(ErrorKind::Transient);
    }
    Some(ErrorKind::Permanent)
}

/// Parses a `Retry-After` header value
///
/// Accepts delta-seconds or an HTTP date. A date in the past yields None.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    (at - Utc::now()).to_std().ok()
}

/// Builds an HTTP client with proper configuration
///
/// # Example
///
/// ```no_run
/// use harvest_frontier::config::UserAgentConfig;
/// use harvest_frontier::crawler::build_http_client;
///
/// let config = UserAgentConfig {
///     crawler_name: "HarvestBot".to_string(),
///     crawler_version: "1.0".to_string(),
///     contact_url: "https://example.com/bot".to_string(),
///     contact_email: "bot@example.com".to_string(),
/// };
///
/// let client = build_http_client(&config).unwrap();
/// ```
pub fn build_http_client(config: &UserAgentConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.header_value())
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(MAX_REDIRECTS))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Default fetcher over reqwest
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn from_config(config: &UserAgentConfig) -> Result<Self, reqwest::Error> {
        Ok(Self::new(build_http_client(config)?))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

fn classify_request_error(err: &reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::transient("request timeout")
    } else if err.is_connect() {
        FetchError::transient(format!("connection failed: {}", err))
    } else if err.is_redirect() {
        FetchError::permanent(format!("redirect error: {}", err))
    } else if err.is_builder() {
        FetchError::permanent(format!("malformed request: {}", err))
    } else {
        FetchError::transient(err.to_string())
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url, timeout: Duration) -> Result<FetchedContent, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_request_error(&e))?;

        let status = response.status();
        if classify_status(status).is_some() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            return Err(FetchError::from_status(status, retry_after));
        }

        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .await
            .map_err(|e| classify_request_error(&e))?;

        Ok(FetchedContent {
            url: final_url,
            status: status.as_u16(),
            content_type,
            body,
        })
    }
}
