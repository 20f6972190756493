use async_trait::async_trait;
use harvest_frontier::config::{parse_config, Config};
use harvest_frontier::crawler::{
    Collaborators, Coordinator, FetchError, FetchedContent, Fetcher, HtmlLinkParser, RunOptions,
};
use harvest_frontier::output::{CrawlRecord, RecordSink, SinkResult};
use harvest_frontier::robots::AllowAll;
use harvest_frontier::storage::SharedStorage;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

/// Base configuration for coordinator tests: no pacing, fast polling
pub fn test_config() -> Config {
    parse_config(
        r#"
[coordinator]
workers = 2
idle-poll-ms = 10
reaper-interval-ms = 50
shutdown-grace-secs = 1
fetch-timeout-secs = 3600

[politeness]
default-min-interval-ms = 0

[storage]
database-path = "./unused.db"
records-path = "./unused.jsonl"

[user-agent]
crawler-name = "TestBot"
crawler-version = "1.0"
contact-url = "https://example.com/contact"
contact-email = "test@example.com"
"#,
    )
    .unwrap()
}

type Script = dyn Fn(&Url, usize) -> Result<String, FetchError> + Send + Sync;

/// Fetcher driven by a closure of (url, call number) that returns an HTML body
///
/// Records every call with the (possibly paused) clock time it was made.
pub struct ScriptedFetcher {
    script: Box<Script>,
    calls: Mutex<Vec<(String, Instant)>>,
}

impl ScriptedFetcher {
    pub fn new<F>(script: F) -> Arc<Self>
    where
        F: Fn(&Url, usize) -> Result<String, FetchError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Serves a titled page with no links for every URL
    pub fn leaf_pages() -> Arc<Self> {
        Self::new(|url, _| Ok(page(url.path(), &[])))
    }

    pub fn calls(&self) -> Vec<(String, Instant)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.calls().into_iter().map(|(url, _)| url).collect()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, url: &Url, _timeout: Duration) -> Result<FetchedContent, FetchError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((url.to_string(), Instant::now()));
            calls.len()
        };
        let body = (self.script)(url, call)?;
        Ok(FetchedContent {
            url: url.clone(),
            status: 200,
            content_type: Some("text/html".to_string()),
            body,
        })
    }
}

/// An HTML page with a title and links
pub fn page(title: &str, links: &[&str]) -> String {
    let anchors: String = links
        .iter()
        .map(|href| format!(r#"<a href="{}">link</a>"#, href))
        .collect();
    format!(
        "<html><head><title>{}</title></head><body>{}</body></html>",
        title, anchors
    )
}

/// Keeps records in memory
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<CrawlRecord>>,
}

impl MemorySink {
    pub fn records(&self) -> Vec<CrawlRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn write(&self, record: &CrawlRecord) -> SinkResult<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

pub fn collaborators(fetcher: Arc<ScriptedFetcher>, sink: Arc<MemorySink>) -> Collaborators {
    Collaborators {
        fetcher,
        parser: Arc::new(HtmlLinkParser),
        sink,
        politeness: Arc::new(AllowAll),
        robots: None,
    }
}

pub fn open(
    config: Config,
    storage: &SharedStorage,
    fetcher: Arc<ScriptedFetcher>,
    sink: Arc<MemorySink>,
) -> Coordinator {
    Coordinator::open(
        config,
        Arc::clone(storage),
        collaborators(fetcher, sink),
        RunOptions {
            fresh: false,
            config_hash: "test".to_string(),
        },
    )
    .unwrap()
}

pub fn urls(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}
