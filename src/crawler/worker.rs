//! Crawl worker
//!
//! Each worker runs one loop: lease a job, fetch it, parse it, write the
//! record, feed discovered links back into the queue, then report the
//! outcome. A worker holds at most one lease at a time and always reports
//! it before taking the next.

use crate::crawler::{Fetcher, Parser};
use crate::frontier::{EnqueueOutcome, FailOutcome, JobQueue};
use crate::output::{CrawlRecord, RecordSink};
use crate::robots::RobotsDirectory;
use crate::state::{Job, JobFailure, WorkerId};
use crate::{FrontierError, QueueError};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};
use url::Url;

/// Fetches robots rules for newly discovered domains before their links
/// are admitted
#[derive(Clone)]
pub struct RobotsPrefetch {
    pub directory: Arc<RobotsDirectory>,
    pub client: reqwest::Client,
}

impl RobotsPrefetch {
    pub async fn ensure(&self, url: &Url, timeout: Duration) {
        self.directory.fetch(&self.client, url, timeout).await;
    }
}

/// Everything a worker shares with its siblings
#[derive(Clone)]
pub struct WorkerContext {
    pub queue: Arc<JobQueue>,
    pub fetcher: Arc<dyn Fetcher>,
    pub parser: Arc<dyn Parser>,
    pub sink: Arc<dyn RecordSink>,
    pub robots: Option<RobotsPrefetch>,
    pub fetch_timeout: Duration,
    pub idle_poll: Duration,
}

pub struct Worker {
    id: WorkerId,
    ctx: WorkerContext,
}

impl Worker {
    pub fn new(id: WorkerId, ctx: WorkerContext) -> Self {
        Self { id, ctx }
    }

    /// Runs until the queue closes or `shutdown` fires
    ///
    /// Cancellation only interrupts the idle wait. A job already leased is
    /// carried through to acknowledge or fail; the coordinator bounds that
    /// with its grace period.
    ///
    /// Returns an error only for failures that must stop the coordinator.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), FrontierError> {
        debug!(worker = self.id, "Worker started");
        loop {
            if shutdown.is_cancelled() || self.ctx.queue.is_closed() {
                break;
            }

            let Some(job) = self.ctx.queue.lease(self.id) else {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.ctx.idle_poll) => {}
                }
                continue;
            };

            let outcome = self.process(&job).await;
            self.report(&job, outcome)?;
        }
        debug!(worker = self.id, "Worker stopped");
        Ok(())
    }

    fn report(&self, job: &Job, outcome: Result<(), JobFailure>) -> Result<(), FrontierError> {
        let result = match outcome {
            Ok(()) => self.ctx.queue.acknowledge(job.id),
            Err(failure) => {
                debug!(worker = self.id, job = %job.id, "Job failed: {}", failure);
                self.ctx.queue.fail(job.id, failure).map(|outcome| {
                    if let FailOutcome::Retrying { delay } = outcome {
                        trace!(job = %job.id, delay_ms = delay.as_millis() as u64, "Requeued");
                    }
                })
            }
        };

        match result {
            Ok(()) => Ok(()),
            Err(err) if err.is_fatal() => {
                error!(worker = self.id, job = %job.id, "{}", err);
                Err(err.into())
            }
            Err(QueueError::NotLeased { .. }) | Err(QueueError::UnknownJob(_)) => {
                warn!(
                    worker = self.id,
                    job = %job.id,
                    "Lease was reclaimed before the outcome was reported"
                );
                Ok(())
            }
            Err(err) => {
                warn!(worker = self.id, job = %job.id, "{}", err);
                Ok(())
            }
        }
    }

    async fn process(&self, job: &Job) -> Result<(), JobFailure> {
        let url = Url::parse(&job.url)
            .map_err(|e| JobFailure::permanent(format!("malformed URL: {}", e)))?;
        let timeout = self.ctx.fetch_timeout;

        let content = match tokio::time::timeout(timeout, self.ctx.fetcher.fetch(&url, timeout)).await
        {
            Ok(Ok(content)) => content,
            Ok(Err(err)) => return Err(err.into_failure()),
            Err(_) => {
                return Err(JobFailure::transient(format!(
                    "fetch timed out after {}s",
                    timeout.as_secs_f64()
                )))
            }
        };
        let status = content.status;

        let parser = Arc::clone(&self.ctx.parser);
        let parsed = tokio::time::timeout(
            timeout,
            tokio::task::spawn_blocking(move || parser.parse(&content)),
        )
        .await;
        let output = match parsed {
            Ok(Ok(Ok(output))) => output,
            Ok(Ok(Err(err))) => return Err(JobFailure::structural(err.message, err.retryable)),
            Ok(Err(join_err)) => {
                return Err(JobFailure::structural(
                    format!("parser panicked: {}", join_err),
                    false,
                ))
            }
            Err(_) => return Err(JobFailure::transient("parse timed out")),
        };

        if let Some(data) = output.record {
            let record = CrawlRecord {
                job_id: job.id.0,
                url: job.url.clone(),
                domain: job.domain.clone(),
                depth: job.depth,
                status,
                fetched_at: Utc::now(),
                data,
            };
            self.ctx
                .sink
                .write(&record)
                .await
                .map_err(|e| JobFailure::transient(format!("record sink: {}", e)))?;
        }

        let follow = job.depth < self.ctx.queue.settings().max_depth;
        let mut admitted = 0;
        for link in &output.links {
            if let (true, Some(robots), Ok(link_url)) = (follow, &self.ctx.robots, Url::parse(link)) {
                robots.ensure(&link_url, timeout).await;
            }
            match self.ctx.queue.enqueue_child(link, job) {
                Ok(EnqueueOutcome::Enqueued(_)) => admitted += 1,
                Ok(_) => {}
                Err(e) => trace!(link = %link, "Skipping link: {}", e),
            }
        }
        debug!(
            worker = self.id,
            job = %job.id,
            links = output.links.len(),
            admitted,
            "Processed"
        );
        Ok(())
    }
}
