//! Crawl coordinator - top-level orchestration
//!
//! This module wires the frontier, checkpointing and the worker pool
//! together and owns the crawl lifecycle:
//! - Opening or resuming a crawl epoch
//! - Restoring the frontier from the last checkpoint
//! - Accepting seed submissions
//! - Running workers, the lease reaper and periodic checkpoints
//! - The shutdown sequence

use crate::checkpoint::{
    Checkpoint, CheckpointManager, CheckpointStore, DatabaseCheckpointStore, FileCheckpointStore,
};
use crate::config::Config;
use crate::crawler::{
    HtmlLinkParser, HttpFetcher, Fetcher, Parser, RobotsPrefetch, Worker, WorkerContext,
};
use crate::frontier::{DeadLetterStore, EnqueueOutcome, JobQueue};
use crate::output::{FrontierMetrics, RecordSink};
use crate::robots::{ConfigPolicy, PolicyChain, PolitenessSource, RobotsDirectory};
use crate::state::JobId;
use crate::storage::{lock, DeadLetter, EpochStatus, SharedStorage, StorageError};
use crate::{FrontierError, Result};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

/// The external collaborators a crawl runs with
#[derive(Clone)]
pub struct Collaborators {
    pub fetcher: Arc<dyn Fetcher>,
    pub parser: Arc<dyn Parser>,
    pub sink: Arc<dyn RecordSink>,
    pub politeness: Arc<dyn PolitenessSource>,

    /// Loads robots rules for new domains before their URLs are admitted
    pub robots: Option<RobotsPrefetch>,
}

impl Collaborators {
    /// The default HTTP stack: reqwest fetcher, HTML link parser, deny list
    /// and pacing overrides from `config`, and robots rules per host
    pub fn http(config: &Config, sink: Arc<dyn RecordSink>) -> Result<Self> {
        let fetcher = HttpFetcher::from_config(&config.user_agent)?;
        let directory = Arc::new(RobotsDirectory::new(&config.user_agent.crawler_name));
        let politeness = PolicyChain::new()
            .with(Arc::new(ConfigPolicy::from_config(config)))
            .with(Arc::clone(&directory) as Arc<dyn PolitenessSource>);

        Ok(Self {
            robots: Some(RobotsPrefetch {
                directory,
                client: fetcher.client().clone(),
            }),
            fetcher: Arc::new(fetcher),
            parser: Arc::new(HtmlLinkParser),
            sink,
            politeness: Arc::new(politeness),
        })
    }
}

/// How to open the crawl
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Discard the checkpoint and start a new epoch
    pub fresh: bool,

    /// Hash of the configuration, recorded on new epochs
    pub config_hash: String,
}

/// Why [`Coordinator::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// No job is pending, backing off or leased
    Drained,

    /// [`Coordinator::shutdown`] was called
    Requested,

    /// An infrastructure failure stopped the crawl
    Fatal,
}

impl StopReason {
    fn epoch_status(&self) -> EpochStatus {
        match self {
            Self::Drained => EpochStatus::Completed,
            Self::Requested => EpochStatus::Interrupted,
            Self::Fatal => EpochStatus::Failed,
        }
    }
}

/// Outcome of a seed submission
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub enqueued: usize,
    pub duplicates: usize,
    pub denied: usize,
    pub invalid: usize,
}

/// Main crawl coordinator structure
pub struct Coordinator {
    config: Arc<Config>,
    storage: SharedStorage,
    queue: Arc<JobQueue>,
    checkpoints: Mutex<CheckpointManager>,
    epoch_id: i64,
    ctx: WorkerContext,
    shutdown: CancellationToken,
}

impl Coordinator {
    /// Opens a crawl
    ///
    /// With `options.fresh` the stored checkpoint is discarded and a new
    /// epoch begins. Otherwise the last checkpoint is restored when its
    /// epoch did not complete; without a usable checkpoint an unfinished
    /// epoch is continued with an empty frontier, and a new epoch is started
    /// when the last one completed.
    pub fn open(
        config: Config,
        storage: SharedStorage,
        collaborators: Collaborators,
        options: RunOptions,
    ) -> Result<Self> {
        let store: Box<dyn CheckpointStore> = match &config.checkpoint.path {
            Some(path) => Box::new(FileCheckpointStore::new(path.clone())),
            None => Box::new(DatabaseCheckpointStore::new(Arc::clone(&storage))),
        };
        let mut checkpoints = CheckpointManager::from_config(store, &config.checkpoint);

        let (epoch_id, resume) = if options.fresh {
            checkpoints.clear()?;
            interrupt_running_epoch(&storage)?;
            let epoch_id = lock(&storage).create_epoch(&options.config_hash)?;
            info!(epoch = epoch_id, "Starting fresh epoch");
            (epoch_id, None)
        } else {
            resume_epoch(&storage, &checkpoints, &options.config_hash)?
        };

        let dead_letters = DeadLetterStore::new(Arc::clone(&storage), epoch_id);
        let queue = JobQueue::from_config(&config, collaborators.politeness, dead_letters)?;
        if let Some(checkpoint) = resume {
            queue.restore(checkpoint.frontier, Instant::now())?;
        }

        let ctx = WorkerContext {
            queue: Arc::new(queue),
            fetcher: collaborators.fetcher,
            parser: collaborators.parser,
            sink: collaborators.sink,
            robots: collaborators.robots,
            fetch_timeout: config.coordinator.fetch_timeout(),
            idle_poll: config.coordinator.idle_poll(),
        };

        Ok(Self {
            config: Arc::new(config),
            storage,
            queue: Arc::clone(&ctx.queue),
            checkpoints: Mutex::new(checkpoints),
            epoch_id,
            ctx,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn epoch_id(&self) -> i64 {
        self.epoch_id
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Token that stops [`Coordinator::run`] when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Requests a graceful shutdown of a running crawl
    pub fn shutdown(&self) {
        info!("Shutdown requested");
        self.shutdown.cancel();
    }

    /// Admits seed URLs at `priority`
    ///
    /// Robots rules for each seed's host are loaded first, so a seed the
    /// host disallows is denied.
    pub async fn submit_seeds(&self, urls: &[String], priority: i32) -> SeedReport {
        let mut report = SeedReport::default();
        for url in urls {
            if let (Some(robots), Ok(parsed)) = (&self.ctx.robots, Url::parse(url)) {
                robots.ensure(&parsed, self.ctx.fetch_timeout).await;
            }
            match self.queue.enqueue(url, priority) {
                Ok(EnqueueOutcome::Enqueued(_)) => report.enqueued += 1,
                Ok(EnqueueOutcome::Duplicate) => report.duplicates += 1,
                Ok(EnqueueOutcome::Denied) | Ok(EnqueueOutcome::TooDeep) => report.denied += 1,
                Err(e) => {
                    warn!(url = %url, "Rejected seed: {}", e);
                    report.invalid += 1;
                }
            }
        }
        info!(
            enqueued = report.enqueued,
            duplicates = report.duplicates,
            denied = report.denied,
            invalid = report.invalid,
            "Seeds submitted"
        );
        report
    }

    /// Submits every `[[seed]]` entry from the configuration
    pub async fn submit_config_seeds(&self) -> SeedReport {
        let mut total = SeedReport::default();
        let seeds = self.config.seed.clone();
        for entry in &seeds {
            let report = self.submit_seeds(&entry.urls, entry.priority).await;
            total.enqueued += report.enqueued;
            total.duplicates += report.duplicates;
            total.denied += report.denied;
            total.invalid += report.invalid;
        }
        total
    }

    pub fn metrics(&self) -> FrontierMetrics {
        self.queue.metrics()
    }

    /// Most recent dead letters of this epoch
    pub fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>> {
        Ok(self.queue.dead_letters().list(limit)?)
    }

    /// Moves a dead-lettered job back into the queue
    pub fn replay(&self, id: JobId) -> Result<JobId> {
        Ok(self.queue.replay(id)?)
    }

    fn checkpoint_manager(&self) -> MutexGuard<'_, CheckpointManager> {
        self.checkpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshots the frontier and saves it
    pub fn save_checkpoint(&self) -> Result<()> {
        let completed = self.queue.completed_total();
        let checkpoint = Checkpoint::new(self.epoch_id, self.queue.snapshot(Instant::now()));
        self.checkpoint_manager().save(&checkpoint, completed)?;
        Ok(())
    }

    fn spawn_workers(&self, workers: &mut JoinSet<Result<()>>) {
        for id in 0..self.config.coordinator.workers {
            let worker = Worker::new(id, self.ctx.clone());
            workers.spawn(worker.run(self.shutdown.child_token()));
        }
    }

    /// Runs the crawl until the frontier drains, shutdown is requested or
    /// an infrastructure failure occurs
    ///
    /// On the way out: leasing stops, in-flight jobs get the shutdown grace
    /// period, leases still outstanding after it are returned to the queue,
    /// and a final checkpoint is written. The epoch is then marked
    /// completed, interrupted or failed.
    pub async fn run(&self) -> Result<StopReason> {
        info!(
            epoch = self.epoch_id,
            workers = self.config.coordinator.workers,
            pending = self.queue.pending_count(),
            "Starting crawl"
        );

        let mut workers = JoinSet::new();
        self.spawn_workers(&mut workers);

        let mut ticker = tokio::time::interval(self.config.coordinator.reaper_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut fatal: Option<FrontierError> = None;

        let reason = loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break StopReason::Requested,
                Some(joined) = workers.join_next() => {
                    match joined {
                        Ok(Ok(())) => debug!("Worker exited"),
                        Ok(Err(e)) => {
                            fatal = Some(e);
                            break StopReason::Fatal;
                        }
                        Err(e) => {
                            fatal = Some(FrontierError::Task(e.to_string()));
                            break StopReason::Fatal;
                        }
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick() {
                        fatal = Some(e);
                        break StopReason::Fatal;
                    }
                    if self.queue.is_idle() {
                        info!("Frontier drained");
                        break StopReason::Drained;
                    }
                }
            }
        };

        if let Some(e) = self.stop_workers(workers).await {
            fatal.get_or_insert(e);
        }
        self.finish(reason, fatal).await
    }

    /// One reaper and checkpoint pass
    fn tick(&self) -> Result<()> {
        let now = Instant::now();
        let reaped = self.queue.reap_expired(now);
        if !reaped.is_empty() {
            warn!(count = reaped.len(), "Reclaimed expired leases");
        }

        let due = self
            .checkpoint_manager()
            .due(self.queue.completed_total(), now);
        if due {
            self.save_checkpoint()?;
        }
        Ok(())
    }

    /// Closes leasing and waits out the grace period
    ///
    /// Returns the first fatal error a worker reported while stopping.
    async fn stop_workers(&self, mut workers: JoinSet<Result<()>>) -> Option<FrontierError> {
        self.queue.close();
        self.shutdown.cancel();

        let deadline = Instant::now() + self.config.coordinator.shutdown_grace();
        let mut fatal = None;
        loop {
            match tokio::time::timeout_at(deadline, workers.join_next()).await {
                Ok(Some(Ok(Ok(())))) => {}
                Ok(Some(Ok(Err(e)))) => {
                    error!("Worker failed during shutdown: {}", e);
                    fatal.get_or_insert(e);
                }
                Ok(Some(Err(e))) => {
                    if !e.is_cancelled() {
                        fatal.get_or_insert(FrontierError::Task(e.to_string()));
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        in_flight = workers.len(),
                        "Shutdown grace elapsed; aborting workers"
                    );
                    workers.abort_all();
                    while workers.join_next().await.is_some() {}
                    break;
                }
            }
        }

        self.queue.force_fail_leased();
        fatal
    }

    async fn finish(
        &self,
        reason: StopReason,
        mut fatal: Option<FrontierError>,
    ) -> Result<StopReason> {
        if let Err(e) = self.save_checkpoint() {
            error!("Final checkpoint failed: {}", e);
            fatal.get_or_insert(e);
        }
        let reason = if fatal.is_some() {
            StopReason::Fatal
        } else {
            reason
        };

        if let Err(e) = self.ctx.sink.flush().await {
            error!("Failed to flush records: {}", e);
        }
        if let Err(e) = lock(&self.storage).finish_epoch(self.epoch_id, reason.epoch_status()) {
            error!(epoch = self.epoch_id, "Failed to record epoch status: {}", e);
        }

        let metrics = self.queue.metrics();
        info!(
            epoch = self.epoch_id,
            reason = ?reason,
            completed = metrics.totals.completed,
            dead_lettered = metrics.totals.dead_lettered,
            pending = metrics.totals.pending + metrics.totals.waiting,
            "Crawl stopped"
        );

        match fatal {
            Some(e) => {
                error!("Crawl stopped on infrastructure failure: {}", e);
                Err(e)
            }
            None => Ok(reason),
        }
    }
}

/// Marks a still-running epoch as interrupted before a fresh start
fn interrupt_running_epoch(storage: &SharedStorage) -> Result<()> {
    let mut storage = lock(storage);
    if let Some(epoch) = storage.get_latest_epoch()? {
        if epoch.status == EpochStatus::Running {
            storage.finish_epoch(epoch.id, EpochStatus::Interrupted)?;
        }
    }
    Ok(())
}

/// Picks the epoch to continue and the checkpoint to restore
fn resume_epoch(
    storage: &SharedStorage,
    checkpoints: &CheckpointManager,
    config_hash: &str,
) -> Result<(i64, Option<Checkpoint>)> {
    if let Some(checkpoint) = checkpoints.load()? {
        let epoch = lock(storage).get_epoch(checkpoint.epoch_id);
        match epoch {
            Ok(epoch) if epoch.status.is_resumable() => {
                lock(storage).finish_epoch(epoch.id, EpochStatus::Running)?;
                info!(epoch = epoch.id, "Resuming epoch from checkpoint");
                return Ok((epoch.id, Some(checkpoint)));
            }
            Ok(epoch) => {
                info!(epoch = epoch.id, "Checkpoint belongs to a completed epoch");
            }
            Err(StorageError::EpochNotFound(id)) => {
                warn!(epoch = id, "Ignoring checkpoint for unknown epoch");
            }
            Err(e) => return Err(e.into()),
        }
    }

    let mut storage = lock(storage);
    if let Some(epoch) = storage.get_latest_epoch()? {
        if epoch.status.is_resumable() {
            warn!(
                epoch = epoch.id,
                "No usable checkpoint; continuing epoch with an empty frontier"
            );
            storage.finish_epoch(epoch.id, EpochStatus::Running)?;
            return Ok((epoch.id, None));
        }
    }
    let epoch_id = storage.create_epoch(config_hash)?;
    info!(epoch = epoch_id, "Starting new epoch");
    Ok((epoch_id, None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::crawler::{FetchError, FetchedContent};
    use crate::output::{CrawlRecord, SinkResult};
    use crate::robots::AllowAll;
    use crate::storage::{shared, MemoryStorage};
    use async_trait::async_trait;
    use std::time::Duration;

    struct NotFound;

    #[async_trait]
    impl Fetcher for NotFound {
        async fn fetch(&self, _url: &Url, _timeout: Duration) -> std::result::Result<FetchedContent, FetchError> {
            Err(FetchError::permanent("HTTP 404"))
        }
    }

    struct Discard;

    #[async_trait]
    impl RecordSink for Discard {
        async fn write(&self, _record: &CrawlRecord) -> SinkResult<()> {
            Ok(())
        }
    }

    fn test_config() -> Config {
        parse_config(
            r#"
[coordinator]
workers = 2
idle-poll-ms = 10
reaper-interval-ms = 50
shutdown-grace-secs = 1

[politeness]
default-min-interval-ms = 0

[storage]
database-path = "./unused.db"
records-path = "./unused.jsonl"

[user-agent]
crawler-name = "TestCrawler"
crawler-version = "1.0"
contact-url = "https://example.com/about"
contact-email = "admin@example.com"
"#,
        )
        .unwrap()
    }

    fn collaborators() -> Collaborators {
        Collaborators {
            fetcher: Arc::new(NotFound),
            parser: Arc::new(HtmlLinkParser),
            sink: Arc::new(Discard),
            politeness: Arc::new(AllowAll),
            robots: None,
        }
    }

    fn open(storage: &SharedStorage, fresh: bool) -> Coordinator {
        Coordinator::open(
            test_config(),
            Arc::clone(storage),
            collaborators(),
            RunOptions {
                fresh,
                config_hash: "hash".to_string(),
            },
        )
        .unwrap()
    }

    fn urls(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_open_creates_epoch() {
        let storage = shared(MemoryStorage::new());
        let coordinator = open(&storage, false);

        let epoch = lock(&storage).get_epoch(coordinator.epoch_id()).unwrap();
        assert_eq!(epoch.status, EpochStatus::Running);
        assert_eq!(epoch.config_hash, "hash");
        assert!(coordinator.queue().is_idle());
    }

    #[tokio::test]
    async fn test_submit_seeds_report() {
        let storage = shared(MemoryStorage::new());
        let coordinator = open(&storage, false);

        let report = coordinator
            .submit_seeds(
                &urls(&["https://a.com/1", "https://a.com/1#x", "not a url", "https://b.com/"]),
                0,
            )
            .await;
        assert_eq!(
            report,
            SeedReport {
                enqueued: 2,
                duplicates: 1,
                denied: 0,
                invalid: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_resume_from_checkpoint() {
        let storage = shared(MemoryStorage::new());
        let first = open(&storage, false);
        first
            .submit_seeds(&urls(&["https://a.com/1", "https://b.com/2"]), 0)
            .await;
        first.save_checkpoint().unwrap();
        let epoch = first.epoch_id();
        drop(first);

        let resumed = open(&storage, false);
        assert_eq!(resumed.epoch_id(), epoch);
        assert_eq!(resumed.queue().pending_count(), 2);
        assert_eq!(resumed.queue().seen().len(), 2);
    }

    #[tokio::test]
    async fn test_fresh_discards_checkpoint() {
        let storage = shared(MemoryStorage::new());
        let first = open(&storage, false);
        first.submit_seeds(&urls(&["https://a.com/1"]), 0).await;
        first.save_checkpoint().unwrap();
        let old_epoch = first.epoch_id();
        drop(first);

        let fresh = open(&storage, true);
        assert_ne!(fresh.epoch_id(), old_epoch);
        assert!(fresh.queue().is_idle());
        assert_eq!(
            lock(&storage).get_epoch(old_epoch).unwrap().status,
            EpochStatus::Interrupted
        );
    }

    #[tokio::test]
    async fn test_run_drains_and_completes_epoch() {
        let storage = shared(MemoryStorage::new());
        let coordinator = open(&storage, false);
        coordinator
            .submit_seeds(&urls(&["https://a.com/1", "https://b.com/2"]), 0)
            .await;

        let reason = coordinator.run().await.unwrap();
        assert_eq!(reason, StopReason::Drained);
        assert_eq!(coordinator.dead_letters(10).unwrap().len(), 2);
        assert_eq!(
            lock(&storage).get_epoch(coordinator.epoch_id()).unwrap().status,
            EpochStatus::Completed
        );

        // A completed epoch is not resumed
        let next = open(&storage, false);
        assert_ne!(next.epoch_id(), coordinator.epoch_id());
        assert!(next.queue().is_idle());
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_epoch() {
        let storage = shared(MemoryStorage::new());
        let coordinator = open(&storage, false);
        coordinator.shutdown();

        let reason = coordinator.run().await.unwrap();
        assert_eq!(reason, StopReason::Requested);
        assert_eq!(
            lock(&storage).get_epoch(coordinator.epoch_id()).unwrap().status,
            EpochStatus::Interrupted
        );
    }

    #[tokio::test]
    async fn test_failed_final_checkpoint_is_fatal() {
        let memory = MemoryStorage::new();
        let switch = memory.fail_switch();
        let storage = shared(memory);
        let coordinator = open(&storage, false);
        coordinator.submit_seeds(&urls(&["https://a.com/1"]), 0).await;
        coordinator.shutdown();

        switch.store(true, std::sync::atomic::Ordering::SeqCst);
        let err = coordinator.run().await.unwrap_err();
        assert!(err.is_fatal());

        // The epoch stays resumable
        switch.store(false, std::sync::atomic::Ordering::SeqCst);
        let epoch = lock(&storage).get_epoch(coordinator.epoch_id()).unwrap();
        assert!(epoch.status.is_resumable());
    }
}
