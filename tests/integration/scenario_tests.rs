//! Frontier guarantees observed through full coordinator runs

use crate::common::{open, page, test_config, urls, MemorySink, ScriptedFetcher};
use harvest_frontier::crawler::{FetchError, StopReason};
use harvest_frontier::state::JobState;
use harvest_frontier::storage::{shared, MemoryStorage};
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_duplicate_urls_fetched_once() {
    let storage = shared(MemoryStorage::new());
    let fetcher = ScriptedFetcher::new(|url, _| {
        Ok(page(
            url.path(),
            &["/1", "/2", "/3#section", "HTTPS://A.COM/3", "/4?utm_source=feed", "/4"],
        ))
    });
    let sink = Arc::new(MemorySink::default());
    let coordinator = open(test_config(), &storage, Arc::clone(&fetcher), Arc::clone(&sink));

    let seed = urls(&["https://a.com/1"]);
    let (first, second) = tokio::join!(
        coordinator.submit_seeds(&seed, 0),
        coordinator.submit_seeds(&seed, 0)
    );
    assert_eq!(first.enqueued + second.enqueued, 1);
    assert_eq!(first.duplicates + second.duplicates, 1);

    assert_eq!(coordinator.run().await.unwrap(), StopReason::Drained);

    let mut fetches: HashMap<String, usize> = HashMap::new();
    for url in fetcher.urls() {
        *fetches.entry(url).or_default() += 1;
    }
    assert_eq!(fetches.len(), 4);
    assert!(fetches.values().all(|&count| count == 1));
    assert_eq!(sink.records().len(), 4);
    assert_eq!(coordinator.queue().seen().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_same_domain_leases_are_paced() {
    let storage = shared(MemoryStorage::new());
    let mut config = test_config();
    config.coordinator.workers = 4;
    config.politeness.default_min_interval_ms = 2000;

    let fetcher = ScriptedFetcher::leaf_pages();
    let sink = Arc::new(MemorySink::default());
    let coordinator = open(config, &storage, Arc::clone(&fetcher), sink);
    coordinator
        .submit_seeds(
            &urls(&["https://a.com/1", "https://a.com/2", "https://a.com/3", "https://b.com/1"]),
            0,
        )
        .await;

    assert_eq!(coordinator.run().await.unwrap(), StopReason::Drained);

    let a_times: Vec<_> = fetcher
        .calls()
        .into_iter()
        .filter(|(url, _)| url.starts_with("https://a.com/"))
        .map(|(_, at)| at)
        .collect();
    assert_eq!(a_times.len(), 3);
    for pair in a_times.windows(2) {
        assert!(pair[1].duration_since(pair[0]) >= Duration::from_secs(2));
    }
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_job_dead_letters_after_max_attempts() {
    let storage = shared(MemoryStorage::new());
    let fetcher = ScriptedFetcher::new(|_, _| {
        Err(FetchError::from_status(StatusCode::TOO_MANY_REQUESTS, None))
    });
    let sink = Arc::new(MemorySink::default());
    let coordinator = open(test_config(), &storage, Arc::clone(&fetcher), sink);
    coordinator
        .submit_seeds(&urls(&["https://a.com/1"]), 0)
        .await;

    assert_eq!(coordinator.run().await.unwrap(), StopReason::Drained);

    assert_eq!(fetcher.calls().len(), 3);
    let letters = coordinator.dead_letters(10).unwrap();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].job.state, JobState::DeadLettered);
    assert_eq!(letters[0].job.attempts, 3);
    assert_eq!(letters[0].job.errors.len(), 3);

    let metrics = coordinator.metrics();
    assert_eq!(metrics.totals.dead_lettered, 1);
    assert_eq!(metrics.totals.retries, 2);
}

#[tokio::test(start_paused = true)]
async fn test_open_circuit_waits_for_probe() {
    let storage = shared(MemoryStorage::new());
    let mut config = test_config();
    config.coordinator.workers = 1;
    config.retry.max_attempts = 10;

    // The first five fetches fail; everything after succeeds
    let fetcher = ScriptedFetcher::new(|url, call| {
        if call <= 5 {
            Err(FetchError::from_status(StatusCode::SERVICE_UNAVAILABLE, None))
        } else {
            Ok(page(url.path(), &[]))
        }
    });
    let sink = Arc::new(MemorySink::default());
    let coordinator = open(config, &storage, Arc::clone(&fetcher), Arc::clone(&sink));
    let seeds: Vec<String> = (0..6).map(|i| format!("https://b.com/{}", i)).collect();
    coordinator.submit_seeds(&seeds, 0).await;

    assert_eq!(coordinator.run().await.unwrap(), StopReason::Drained);

    let calls = fetcher.calls();
    assert_eq!(calls.len(), 11);
    // Nothing is leased while the circuit is open
    assert!(calls[5].1.duration_since(calls[4].1) >= Duration::from_secs(30));

    let metrics = coordinator.metrics();
    assert_eq!(metrics.totals.completed, 6);
    assert_eq!(metrics.totals.dead_lettered, 0);
    assert_eq!(metrics.totals.open_circuits, 0);
    let path: Vec<String> = metrics
        .transitions
        .iter()
        .filter(|t| t.domain == "b.com")
        .map(|t| format!("{}->{}", t.from, t.to))
        .collect();
    assert_eq!(path, vec!["closed->open", "open->half-open", "half-open->closed"]);
    assert_eq!(sink.records().len(), 6);
}
