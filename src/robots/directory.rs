//! Per-host robots.txt cache

use crate::robots::{ParsedRobots, PolitenessDirective, PolitenessSource};
use dashmap::DashMap;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Robots rules keyed by host
///
/// Rules are loaded ahead of admission, either with [`fetch`] or directly
/// with [`insert`]. A host without rules is allowed with no extra pacing.
///
/// [`fetch`]: RobotsDirectory::fetch
/// [`insert`]: RobotsDirectory::insert
pub struct RobotsDirectory {
    user_agent: String,
    rules: DashMap<String, ParsedRobots>,
}

impl RobotsDirectory {
    pub fn new(user_agent: &str) -> Self {
        Self {
            user_agent: user_agent.to_string(),
            rules: DashMap::new(),
        }
    }

    pub fn insert(&self, domain: &str, content: &str) {
        self.rules.insert(
            domain.to_lowercase(),
            ParsedRobots::from_content(content, &self.user_agent),
        );
    }

    pub fn contains(&self, domain: &str) -> bool {
        self.rules.contains_key(domain)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Loads rules for the host of `url` unless already cached
    ///
    /// A missing robots.txt (4xx) allows everything. Server errors and
    /// network failures are logged and also treated as allow-all, so one
    /// unreachable host cannot stall admission for the rest of the crawl.
    pub async fn fetch(&self, client: &reqwest::Client, url: &Url, timeout: Duration) {
        let Some(domain) = url.host_str().map(str::to_lowercase) else {
            return;
        };
        if self.contains(&domain) {
            return;
        }

        let mut robots_url = url.clone();
        robots_url.set_path("/robots.txt");
        robots_url.set_query(None);
        robots_url.set_fragment(None);

        let content = match client.get(robots_url.as_str()).timeout(timeout).send().await {
            Ok(response) if response.status().is_success() => match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    warn!(%domain, "Failed to read robots.txt body: {}", e);
                    String::new()
                }
            },
            Ok(response) => {
                debug!(%domain, status = %response.status(), "No usable robots.txt");
                String::new()
            }
            Err(e) => {
                warn!(%domain, "Failed to fetch robots.txt: {}", e);
                String::new()
            }
        };

        self.insert(&domain, &content);
    }
}

impl PolitenessSource for RobotsDirectory {
    fn directive(&self, url: &Url, domain: &str) -> PolitenessDirective {
        match self.rules.get(domain) {
            Some(robots) => {
                if robots.is_allowed(url.as_str()) {
                    PolitenessDirective::allow().with_min_interval(robots.crawl_delay())
                } else {
                    PolitenessDirective::deny()
                }
            }
            None => PolitenessDirective::allow(),
        }
    }
}
