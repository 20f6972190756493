//! Parse collaborator and the default HTML link parser
//!
//! The default parser extracts:
//! - Links to follow (from <a> tags and canonical links)
//! - The page title, emitted as the page's record

use crate::crawler::FetchedContent;
use scraper::{Html, Selector};
use serde_json::json;
use thiserror::Error;
use url::Url;

/// What a parser found in one document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseOutput {
    /// Record for the sink; None when the page yields nothing to keep
    pub record: Option<serde_json::Value>,

    /// Absolute URLs to feed back into the frontier
    pub links: Vec<String>,
}

/// A structural failure
///
/// Permanent by default. A parser sets `retryable` when the content may
/// parse later, e.g. a page that was not fully rendered.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ParseError {
    pub message: String,
    pub retryable: bool,
}

impl ParseError {
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }
}

/// Turns fetched content into a record and discovered links
pub trait Parser: Send + Sync {
    fn parse(&self, content: &FetchedContent) -> Result<ParseOutput, ParseError>;
}

/// Extracted information from an HTML page
#[derive(Debug, Clone)]
pub struct ParsedPage {
    pub title: Option<String>,

    /// All links found on the page (absolute URLs)
    pub links: Vec<String>,
}

/// Parses HTML content and extracts links and the title
///
/// # Link Extraction Rules
///
/// **Include:**
/// - `<a href="...">` tags
/// - `<link rel="canonical" href="...">`
///
/// **Exclude:**
/// - `<a href="..." download>`
/// - `javascript:`, `mailto:`, `tel:` links
/// - Data URIs
/// - Fragment-only links
///
/// `rel="nofollow"` links are followed.
pub fn parse_html(html: &str, base_url: &Url) -> ParsedPage {
    let document = Html::parse_document(html);
    ParsedPage {
        title: extract_title(&document),
        links: extract_links(&document, base_url),
    }
}

fn extract_title(document: &Html) -> Option<String> {
    let title_selector = Selector::parse("title").ok()?;

    document
        .select(&title_selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn extract_links(document: &Html, base_url: &Url) -> Vec<String> {
    let mut links = Vec::new();

    if let Ok(a_selector) = Selector::parse("a[href]") {
        for element in document.select(&a_selector) {
            if element.value().attr("download").is_some() {
                continue;
            }
            if let Some(absolute) = element
                .value()
                .attr("href")
                .and_then(|href| resolve_link(href, base_url))
            {
                links.push(absolute);
            }
        }
    }

    if let Ok(canonical_selector) = Selector::parse("link[rel='canonical'][href]") {
        for element in document.select(&canonical_selector) {
            if let Some(absolute) = element
                .value()
                .attr("href")
                .and_then(|href| resolve_link(href, base_url))
            {
                links.push(absolute);
            }
        }
    }

    links
}

/// Resolves an href against the page URL; None for links that are never crawled
fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| href.starts_with(scheme))
    {
        return None;
    }

    let absolute = base_url.join(href).ok()?;
    matches!(absolute.scheme(), "http" | "https").then(|| absolute.to_string())
}

/// Default parser: one `{title, links}` record per HTML page plus its links
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlLinkParser;

impl Parser for HtmlLinkParser {
    fn parse(&self, content: &FetchedContent) -> Result<ParseOutput, ParseError> {
        if let Some(content_type) = &content.content_type {
            if !content_type.contains("html") {
                return Err(ParseError::permanent(format!(
                    "expected HTML, got {}",
                    content_type
                )));
            }
        }
        if content.body.trim().is_empty() {
            return Err(ParseError::retryable("empty document"));
        }

        let page = parse_html(&content.body, &content.url);
        let record = json!({
            "title": page.title,
            "links": page.links.len(),
        });
        Ok(ParseOutput {
            record: Some(record),
            links: page.links,
        })
    }
}
