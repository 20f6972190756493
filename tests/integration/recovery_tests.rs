//! Restart behavior: checkpoints, interrupted epochs and dead-letter replay

use crate::common::{open, test_config, urls, MemorySink, ScriptedFetcher};
use harvest_frontier::crawler::StopReason;
use harvest_frontier::frontier::FailOutcome;
use harvest_frontier::state::JobFailure;
use harvest_frontier::storage::{lock, open_storage, shared, EpochStatus, MemoryStorage};
use std::collections::HashSet;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test]
async fn test_checkpoint_survives_restart() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("frontier.db");
    let mut config = test_config();
    config.checkpoint.path = Some(dir.path().join("frontier.checkpoint"));

    let (epoch, acknowledged) = {
        let storage = shared(open_storage(&db).unwrap());
        let coordinator = open(
            config.clone(),
            &storage,
            ScriptedFetcher::leaf_pages(),
            Arc::new(MemorySink::default()),
        );
        let seeds: Vec<String> = (0..500)
            .map(|i| format!("https://site{}.com/page/{}", i % 50, i))
            .collect();
        assert_eq!(coordinator.submit_seeds(&seeds, 0).await.enqueued, 500);

        let queue = coordinator.queue();
        let acknowledged: HashSet<String> = (0..490)
            .map(|_| {
                let job = queue.lease(0).unwrap();
                queue.acknowledge(job.id).unwrap();
                job.url
            })
            .collect();
        coordinator.save_checkpoint().unwrap();

        // Dropped without a shutdown, as if the process were killed
        (coordinator.epoch_id(), acknowledged)
    };

    let storage = shared(open_storage(&db).unwrap());
    let fetcher = ScriptedFetcher::leaf_pages();
    let coordinator = open(
        config,
        &storage,
        Arc::clone(&fetcher),
        Arc::new(MemorySink::default()),
    );
    assert_eq!(coordinator.epoch_id(), epoch);
    assert_eq!(coordinator.queue().pending_count(), 10);
    assert_eq!(coordinator.queue().seen().len(), 500);

    let done = acknowledged.iter().next().unwrap().clone();
    assert_eq!(coordinator.submit_seeds(&[done], 0).await.duplicates, 1);

    assert_eq!(coordinator.run().await.unwrap(), StopReason::Drained);
    let refetched = fetcher.urls();
    assert_eq!(refetched.len(), 10);
    assert!(refetched.iter().all(|url| !acknowledged.contains(url)));
}

#[tokio::test]
async fn test_corrupt_checkpoint_starts_empty() {
    let dir = TempDir::new().unwrap();
    let checkpoint_path = dir.path().join("frontier.checkpoint");
    let mut config = test_config();
    config.checkpoint.path = Some(checkpoint_path.clone());
    let storage = shared(MemoryStorage::new());

    let first = open(
        config.clone(),
        &storage,
        ScriptedFetcher::leaf_pages(),
        Arc::new(MemorySink::default()),
    );
    first
        .submit_seeds(&urls(&["https://a.com/1", "https://b.com/1"]), 0)
        .await;
    first.save_checkpoint().unwrap();
    let epoch = first.epoch_id();
    drop(first);

    fs::write(&checkpoint_path, "{\"checksum\": \"00\", \"payload\": \"{}\"}").unwrap();

    let second = open(
        config,
        &storage,
        ScriptedFetcher::leaf_pages(),
        Arc::new(MemorySink::default()),
    );
    assert_eq!(second.epoch_id(), epoch);
    assert!(second.queue().is_idle());
    assert!(second.queue().seen().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_keeps_remaining_work() {
    let storage = shared(MemoryStorage::new());
    let mut config = test_config();
    config.politeness.default_min_interval_ms = 2000;

    let first = open(
        config.clone(),
        &storage,
        ScriptedFetcher::leaf_pages(),
        Arc::new(MemorySink::default()),
    );
    let seeds: Vec<String> = (0..5).map(|i| format!("https://a.com/{}", i)).collect();
    first.submit_seeds(&seeds, 0).await;

    let token = first.shutdown_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        token.cancel();
    });
    assert_eq!(first.run().await.unwrap(), StopReason::Requested);

    let completed = first.metrics().totals.completed;
    assert_eq!(completed, 2);
    assert_eq!(
        lock(&storage).get_epoch(first.epoch_id()).unwrap().status,
        EpochStatus::Interrupted
    );
    let epoch = first.epoch_id();
    drop(first);

    let fetcher = ScriptedFetcher::leaf_pages();
    let second = open(config, &storage, Arc::clone(&fetcher), Arc::new(MemorySink::default()));
    assert_eq!(second.epoch_id(), epoch);
    assert_eq!(second.queue().pending_count(), 3);
    assert_eq!(second.queue().seen().len(), 5);

    assert_eq!(second.run().await.unwrap(), StopReason::Drained);
    assert_eq!(fetcher.calls().len(), 3);
}

#[tokio::test]
async fn test_replay_dead_letter_after_restart() {
    let storage = shared(MemoryStorage::new());

    let first = open(
        test_config(),
        &storage,
        ScriptedFetcher::leaf_pages(),
        Arc::new(MemorySink::default()),
    );
    first.submit_seeds(&urls(&["https://a.com/gone"]), 0).await;
    let job = first.queue().lease(0).unwrap();
    assert_eq!(
        first
            .queue()
            .fail(job.id, JobFailure::permanent("HTTP 410"))
            .unwrap(),
        FailOutcome::DeadLettered
    );
    first.save_checkpoint().unwrap();
    drop(first);

    let fetcher = ScriptedFetcher::leaf_pages();
    let sink = Arc::new(MemorySink::default());
    let second = open(test_config(), &storage, Arc::clone(&fetcher), Arc::clone(&sink));
    assert!(second.queue().is_idle());

    let letters = second.dead_letters(10).unwrap();
    assert_eq!(letters.len(), 1);
    assert_eq!(second.replay(letters[0].job.id).unwrap(), job.id);
    assert!(second.replay(job.id).is_err());

    assert_eq!(second.run().await.unwrap(), StopReason::Drained);
    assert_eq!(fetcher.urls(), vec!["https://a.com/gone".to_string()]);
    assert_eq!(sink.records().len(), 1);
    assert!(second.dead_letters(10).unwrap().is_empty());
}

#[tokio::test]
async fn test_dead_letter_after_last_checkpoint_stays_terminal() {
    let storage = shared(MemoryStorage::new());

    let first = open(
        test_config(),
        &storage,
        ScriptedFetcher::leaf_pages(),
        Arc::new(MemorySink::default()),
    );
    first.submit_seeds(&urls(&["https://a.com/gone"]), 0).await;
    let job = first.queue().lease(0).unwrap();
    first.save_checkpoint().unwrap();
    first
        .queue()
        .fail(job.id, JobFailure::permanent("HTTP 410"))
        .unwrap();
    drop(first);

    let fetcher = ScriptedFetcher::leaf_pages();
    let second = open(
        test_config(),
        &storage,
        Arc::clone(&fetcher),
        Arc::new(MemorySink::default()),
    );
    assert!(second.queue().is_idle());
    assert_eq!(second.dead_letters(10).unwrap().len(), 1);

    assert_eq!(second.replay(job.id).unwrap(), job.id);
    assert_eq!(second.run().await.unwrap(), StopReason::Drained);
    assert_eq!(fetcher.urls(), vec!["https://a.com/gone".to_string()]);
}
