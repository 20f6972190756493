//! Robots.txt rules for one host

use robotstxt::DefaultMatcher;
use std::time::Duration;

/// Robots rules resolved for a single user agent
///
/// Allow/deny decisions are delegated to the `robotstxt` matcher; the
/// `Crawl-delay` extension, which that matcher ignores, is extracted when
/// the rules are built.
#[derive(Debug, Clone)]
pub struct ParsedRobots {
    content: String,
    user_agent: String,
    crawl_delay: Option<Duration>,
}

impl ParsedRobots {
    /// Builds rules for `user_agent`; only its product token is matched
    pub fn from_content(content: &str, user_agent: &str) -> Self {
        let token = product_token(user_agent);
        Self {
            content: content.to_string(),
            crawl_delay: parse_crawl_delay(content, &token),
            user_agent: token,
        }
    }

    /// Rules that allow everything; used when robots.txt is absent
    pub fn allow_all(user_agent: &str) -> Self {
        Self::from_content("", user_agent)
    }

    pub fn is_allowed(&self, url: &str) -> bool {
        if self.content.trim().is_empty() {
            return true;
        }
        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&self.content, &self.user_agent, url)
    }

    pub fn crawl_delay(&self) -> Option<Duration> {
        self.crawl_delay
    }
}

/// `HarvestBot/1.0 (+https://...)` -> `HarvestBot`
fn product_token(user_agent: &str) -> String {
    user_agent
        .split(|c: char| c == '/' || c.is_whitespace())
        .next()
        .unwrap_or(user_agent)
        .to_string()
}

/// Finds the `Crawl-delay` for the agent's product token
///
/// A group is a run of `User-agent` lines followed by rules. A group naming
/// the agent (case-insensitive) wins over `*`.
fn parse_crawl_delay(content: &str, token: &str) -> Option<Duration> {
    let agent = token.to_lowercase();

    let mut group: Vec<String> = Vec::new();
    let mut in_rules = false;
    let mut specific: Option<f64> = None;
    let mut wildcard: Option<f64> = None;

    for line in content.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_lowercase();
        let value = value.trim();

        if key == "user-agent" {
            if in_rules {
                group.clear();
                in_rules = false;
            }
            group.push(value.to_lowercase());
            continue;
        }
        in_rules = true;

        if key != "crawl-delay" {
            continue;
        }
        let Ok(seconds) = value.parse::<f64>() else {
            continue;
        };
        if !seconds.is_finite() || seconds < 0.0 {
            continue;
        }
        if group.iter().any(|ua| ua != "*" && *ua == agent) {
            specific = Some(seconds);
        } else if group.iter().any(|ua| ua == "*") {
            wildcard = Some(seconds);
        }
    }

    specific.or(wildcard).map(Duration::from_secs_f64)
}
