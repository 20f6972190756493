//! Full crawls against a mock HTTP server with the default collaborators
//!
//! These tests use wiremock for the site, SQLite for durable state and the
//! JSON-lines sink for records.

use crate::common::{page, test_config};
use harvest_frontier::crawler::{Collaborators, Coordinator, RunOptions, StopReason};
use harvest_frontier::output::{CrawlRecord, JsonLinesSink};
use harvest_frontier::storage::{lock, open_storage, shared, EpochStatus};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn html(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/html; charset=utf-8")
        .set_body_string(body)
}

fn read_records(path: &Path) -> Vec<CrawlRecord> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn test_full_crawl_single_host() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(page("Home", &["/a", "/b", "/private", "mailto:x@y.z"])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(html(page("Page A", &["/"])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/private"))
        .respond_with(html(page("Secret", &[])))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let records_path = dir.path().join("records.jsonl");
    let storage = shared(open_storage(&dir.path().join("frontier.db")).unwrap());
    let config = test_config();
    let sink = Arc::new(JsonLinesSink::open(&records_path).await.unwrap());
    let collaborators = Collaborators::http(&config, sink).unwrap();

    let coordinator = Coordinator::open(
        config,
        Arc::clone(&storage),
        collaborators,
        RunOptions {
            fresh: true,
            config_hash: "abc".to_string(),
        },
    )
    .unwrap();
    let report = coordinator.submit_seeds(&[format!("{}/", base)], 0).await;
    assert_eq!(report.enqueued, 1);

    assert_eq!(coordinator.run().await.unwrap(), StopReason::Drained);

    let records = read_records(&records_path);
    let mut titles: Vec<String> = records
        .iter()
        .map(|r| r.data["title"].as_str().unwrap().to_string())
        .collect();
    titles.sort();
    assert_eq!(titles, vec!["Home", "Page A"]);
    assert!(records.iter().all(|r| r.domain == "127.0.0.1"));

    let letters = coordinator.dead_letters(10).unwrap();
    assert_eq!(letters.len(), 1);
    assert!(letters[0].job.url.ends_with("/b"));
    assert!(letters[0].final_error.ends_with("HTTP 404"));

    let metrics = coordinator.metrics();
    assert_eq!(metrics.totals.completed, 2);
    assert_eq!(metrics.totals.dead_lettered, 1);
    assert_eq!(metrics.seen_urls, 3);
    assert_eq!(
        lock(&storage).get_epoch(coordinator.epoch_id()).unwrap().status,
        EpochStatus::Completed
    );
}

#[tokio::test]
async fn test_retry_after_is_honored() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503).insert_header("retry-after", "1"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(html(page("Recovered", &[])))
        .with_priority(2)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let records_path = dir.path().join("records.jsonl");
    let storage = shared(open_storage(&dir.path().join("frontier.db")).unwrap());
    let config = test_config();
    let sink = Arc::new(JsonLinesSink::open(&records_path).await.unwrap());
    let collaborators = Collaborators::http(&config, sink).unwrap();

    let coordinator =
        Coordinator::open(config, storage, collaborators, RunOptions::default()).unwrap();
    coordinator
        .submit_seeds(&[format!("{}/flaky", base)], 0)
        .await;

    let started = std::time::Instant::now();
    assert_eq!(coordinator.run().await.unwrap(), StopReason::Drained);
    assert!(started.elapsed() >= std::time::Duration::from_secs(1));

    let records = read_records(&records_path);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].data["title"], "Recovered");

    let metrics = coordinator.metrics();
    assert_eq!(metrics.totals.retries, 1);
    assert_eq!(metrics.totals.completed, 1);
}
