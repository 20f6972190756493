//! Priority Job Queue
//!
//! Pending jobs live in one lane per domain. A lane keeps its ready jobs
//! ordered by `(priority, enqueued_at, id)` and its backing-off jobs ordered
//! by the instant they become eligible again. Each lane has its own lock;
//! the map of lanes is only read to hand out `Arc`s, so leasing from one
//! domain never waits on work in another.
//!
//! Lock order is lane, then domain state, then storage. Nothing inside the
//! tracker or the dead-letter store takes a lane lock.

use crate::config::Config;
use crate::frontier::{Backoff, DeadLetterStore, DomainCounter, DomainTracker, SeenRecord, SeenSet};
use crate::output::{DomainMetrics, FrontierMetrics};
use crate::robots::PolitenessSource;
use crate::state::{
    Admission, DomainSnapshot, ErrorKind, Job, JobFailure, JobId, JobState, WorkerId,
};
use crate::url::CanonicalUrl;
use crate::{QueueError, QueueResult, UrlResult};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Circuit transitions included in a metrics snapshot
const METRICS_TRANSITIONS: usize = 20;

/// Queue limits taken from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    pub max_attempts: u32,
    pub lease_timeout: Duration,
    pub max_depth: u32,
    pub discovered_priority_step: i32,
}

impl QueueSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.retry.max_attempts,
            lease_timeout: config.coordinator.lease_timeout(),
            max_depth: config.coordinator.max_depth,
            discovered_priority_step: config.coordinator.discovered_priority_step,
        }
    }
}

/// Result of an enqueue call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A new pending job was created
    Enqueued(JobId),

    /// The canonical URL was already admitted this epoch
    Duplicate,

    /// The politeness source refused the URL
    Denied,

    /// A discovered link beyond the depth limit
    TooDeep,
}

impl EnqueueOutcome {
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            Self::Enqueued(id) => Some(*id),
            _ => None,
        }
    }
}

/// What `fail` did with a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Back in the queue, eligible again after `delay`
    Retrying { delay: Duration },

    /// Moved to the dead-letter store
    DeadLettered,
}

/// A job as stored in a checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingJob {
    pub job: Job,

    /// Remaining retry delay; zero for a job that is ready now
    #[serde(default)]
    pub ready_in_ms: u64,
}

/// Consistent copy of everything the frontier needs to resume
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrontierSnapshot {
    pub next_job_id: u64,
    pub seen: Vec<SeenRecord>,
    pub jobs: Vec<PendingJob>,
    pub domains: BTreeMap<String, DomainSnapshot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    priority: i32,
    enqueued_at: DateTime<Utc>,
    id: JobId,
}

impl QueueKey {
    fn of(job: &Job) -> Self {
        Self {
            priority: job.priority,
            enqueued_at: job.enqueued_at,
            id: job.id,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct LeaseInfo {
    leased_at: Instant,
    admission: Admission,
}

/// Pending, backing-off and leased jobs of one domain
#[derive(Debug, Default)]
struct DomainLane {
    ready: BTreeSet<QueueKey>,
    waiting: BTreeSet<(Instant, JobId)>,
    jobs: HashMap<JobId, Job>,
    leases: HashMap<JobId, LeaseInfo>,
}

impl DomainLane {
    fn push_ready(&mut self, mut job: Job) {
        job.state = JobState::Pending;
        self.ready.insert(QueueKey::of(&job));
        self.jobs.insert(job.id, job);
    }

    fn push_waiting(&mut self, mut job: Job, ready_at: Instant) {
        job.state = JobState::Failed;
        self.waiting.insert((ready_at, job.id));
        self.jobs.insert(job.id, job);
    }

    /// Moves backing-off jobs whose delay has elapsed into the ready set
    fn promote(&mut self, now: Instant) {
        while let Some(&(ready_at, id)) = self.waiting.first() {
            if ready_at > now {
                break;
            }
            self.waiting.pop_first();
            if let Some(job) = self.jobs.get_mut(&id) {
                job.state = JobState::Pending;
                self.ready.insert(QueueKey::of(job));
            }
        }
    }

    fn head(&self) -> Option<QueueKey> {
        self.ready.first().copied()
    }

    fn check_leased(&self, id: JobId) -> QueueResult<()> {
        match self.jobs.get(&id) {
            None => Err(QueueError::UnknownJob(id)),
            Some(job) if job.state != JobState::Leased => Err(QueueError::NotLeased {
                id,
                state: job.state,
            }),
            Some(_) => Ok(()),
        }
    }

    /// Returns a leased job to the ready set without touching its attempts
    fn release(&mut self, id: JobId, reason: &str) -> Option<LeaseInfo> {
        let lease = self.leases.remove(&id)?;
        if let Some(job) = self.jobs.get_mut(&id) {
            job.record_error(ErrorKind::Transient, reason);
            job.state = JobState::Pending;
            job.leased_at = None;
            job.leased_by = None;
            self.ready.insert(QueueKey::of(job));
        }
        Some(lease)
    }

    fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

fn lock_lane(lane: &Mutex<DomainLane>) -> MutexGuard<'_, DomainLane> {
    lane.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The shared frontier queue
///
/// Every operation is safe to call from any number of workers at once.
/// Mutations hold the read side of `gate`; [`JobQueue::snapshot`] takes the
/// write side, so a checkpoint sees no half-applied transition while
/// fetches already in flight keep running.
pub struct JobQueue {
    seen: Arc<SeenSet>,
    tracker: Arc<DomainTracker>,
    policy: Arc<dyn PolitenessSource>,
    dead_letters: DeadLetterStore,
    backoff: Backoff,
    settings: QueueSettings,
    lanes: DashMap<String, Arc<Mutex<DomainLane>>>,
    index: DashMap<JobId, String>,
    next_id: AtomicU64,
    cursor: AtomicUsize,
    closed: AtomicBool,
    completed: AtomicU64,
    gate: RwLock<()>,
}

impl JobQueue {
    /// Creates an empty queue
    ///
    /// Job IDs start above every ID already in the dead-letter store, so a
    /// replayed letter never collides with a new job.
    pub fn new(
        seen: Arc<SeenSet>,
        tracker: Arc<DomainTracker>,
        policy: Arc<dyn PolitenessSource>,
        dead_letters: DeadLetterStore,
        backoff: Backoff,
        settings: QueueSettings,
    ) -> QueueResult<Self> {
        let first_id = dead_letters.max_id()?.map_or(1, |id| id.0 + 1);
        Ok(Self {
            seen,
            tracker,
            policy,
            dead_letters,
            backoff,
            settings,
            lanes: DashMap::new(),
            index: DashMap::new(),
            next_id: AtomicU64::new(first_id),
            cursor: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            completed: AtomicU64::new(0),
            gate: RwLock::new(()),
        })
    }

    /// Builds the queue and its seen-set and domain tracker from configuration
    pub fn from_config(
        config: &Config,
        policy: Arc<dyn PolitenessSource>,
        dead_letters: DeadLetterStore,
    ) -> QueueResult<Self> {
        let tracker = DomainTracker::new(
            config.politeness.default_min_interval(),
            config.circuit_breaker.clone(),
        );
        Self::new(
            Arc::new(SeenSet::new()),
            Arc::new(tracker),
            policy,
            dead_letters,
            Backoff::from_config(&config.retry),
            QueueSettings::from_config(config),
        )
    }

    pub fn seen(&self) -> &SeenSet {
        &self.seen
    }

    pub fn tracker(&self) -> &DomainTracker {
        &self.tracker
    }

    pub fn dead_letters(&self) -> &DeadLetterStore {
        &self.dead_letters
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    fn shared_gate(&self) -> RwLockReadGuard<'_, ()> {
        self.gate.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn lane(&self, domain: &str) -> Arc<Mutex<DomainLane>> {
        if let Some(lane) = self.lanes.get(domain) {
            return Arc::clone(lane.value());
        }
        let lane = self
            .lanes
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(DomainLane::default())));
        Arc::clone(lane.value())
    }

    fn domain_of(&self, id: JobId) -> QueueResult<String> {
        self.index
            .get(&id)
            .map(|domain| domain.value().clone())
            .ok_or(QueueError::UnknownJob(id))
    }

    fn insert_ready(&self, job: Job) {
        self.index.insert(job.id, job.domain.clone());
        let lane = self.lane(&job.domain);
        lock_lane(&lane).push_ready(job);
    }

    /// Admits a seed URL
    ///
    /// Malformed URLs are rejected with an error; denied and duplicate URLs
    /// are reported through the outcome and leave no trace.
    pub fn enqueue(&self, url: &str, priority: i32) -> UrlResult<EnqueueOutcome> {
        let canonical = CanonicalUrl::parse(url)?;
        Ok(self.admit(canonical, priority, 0))
    }

    /// Admits a link discovered while processing `parent`
    pub fn enqueue_child(&self, url: &str, parent: &Job) -> UrlResult<EnqueueOutcome> {
        let canonical = CanonicalUrl::parse(url)?;
        let depth = parent.depth.saturating_add(1);
        if depth > self.settings.max_depth {
            trace!(url = %canonical, depth, "Dropping link past max depth");
            return Ok(EnqueueOutcome::TooDeep);
        }
        let priority = parent
            .priority
            .saturating_add(self.settings.discovered_priority_step);
        Ok(self.admit(canonical, priority, depth))
    }

    fn admit(&self, canonical: CanonicalUrl, priority: i32, depth: u32) -> EnqueueOutcome {
        let _gate = self.shared_gate();

        let directive = self.policy.directive(canonical.url(), canonical.domain());
        if !directive.allowed {
            debug!(url = %canonical, "Denied by politeness policy");
            return EnqueueOutcome::Denied;
        }
        if !self.seen.admit_canonical(&canonical) {
            return EnqueueOutcome::Duplicate;
        }

        self.tracker
            .configure(canonical.domain(), directive.min_interval);

        let id = JobId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (url, domain) = canonical.into_parts();
        let job = Job::new(id, url.into(), domain, priority, depth);
        trace!(job = %id, url = %job.url, priority, depth, "Enqueued");
        self.insert_ready(job);
        EnqueueOutcome::Enqueued(id)
    }

    /// Leases the best eligible job to `worker`
    pub fn lease(&self, worker: WorkerId) -> Option<Job> {
        self.lease_at(worker, Instant::now())
    }

    /// Leases the best eligible job as of `now`
    ///
    /// A domain is eligible when it has a ready job, its pacing interval has
    /// elapsed and its circuit admits a lease. Among eligible domains the
    /// lowest priority value wins, then the earliest enqueue time. Remaining
    /// ties go to the domain that comes first in a rotation whose starting
    /// point advances with every call.
    ///
    /// The final pacing and circuit check is made again under the domain
    /// lock, so a domain that another worker claimed in the meantime is
    /// skipped rather than leased twice.
    pub fn lease_at(&self, worker: WorkerId, now: Instant) -> Option<Job> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        let _gate = self.shared_gate();

        let lanes: Vec<(String, Arc<Mutex<DomainLane>>)> = self
            .lanes
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        if lanes.is_empty() {
            return None;
        }

        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % lanes.len();
        let mut candidates = Vec::new();
        for offset in 0..lanes.len() {
            let (domain, lane) = &lanes[(start + offset) % lanes.len()];
            let head = {
                let mut lane = lock_lane(lane);
                lane.promote(now);
                lane.head()
            };
            let Some(head) = head else { continue };
            if !self.tracker.can_lease(domain, now) {
                trace!(domain = %domain, "Domain not ready");
                continue;
            }
            candidates.push((head, offset, domain, lane));
        }
        candidates.sort_by(|a, b| {
            (a.0.priority, a.0.enqueued_at, a.1).cmp(&(b.0.priority, b.0.enqueued_at, b.1))
        });

        for (_, _, domain, lane) in candidates {
            let mut lane = lock_lane(lane);
            let Some(head) = lane.head() else { continue };
            let Some(admission) = self.tracker.try_acquire(domain, now) else {
                continue;
            };

            lane.ready.remove(&head);
            let Some(job) = lane.jobs.get_mut(&head.id) else {
                warn!(job = %head.id, "Ready key without a job");
                continue;
            };
            job.state = JobState::Leased;
            job.attempts += 1;
            job.leased_at = Some(Utc::now());
            job.leased_by = Some(worker);
            let leased = job.clone();
            lane.leases.insert(
                head.id,
                LeaseInfo {
                    leased_at: now,
                    admission,
                },
            );

            debug!(
                job = %leased.id,
                worker,
                url = %leased.url,
                attempt = leased.attempts,
                probe = admission == Admission::Probe,
                "Leased"
            );
            return Some(leased);
        }
        None
    }

    /// Marks a leased job completed and drops it from the queue
    pub fn acknowledge(&self, id: JobId) -> QueueResult<()> {
        let _gate = self.shared_gate();
        let domain = self.domain_of(id)?;
        let lane = self.lane(&domain);

        {
            let mut lane = lock_lane(&lane);
            lane.check_leased(id)?;
            lane.leases.remove(&id);
            lane.jobs.remove(&id);
        }
        self.index.remove(&id);

        self.tracker.record_success(&domain);
        self.tracker.count(&domain, DomainCounter::Completed);
        self.completed.fetch_add(1, Ordering::Relaxed);
        debug!(job = %id, domain = %domain, "Completed");
        Ok(())
    }

    /// Reports a failed attempt for a leased job
    pub fn fail(&self, id: JobId, failure: JobFailure) -> QueueResult<FailOutcome> {
        self.fail_at(id, failure, Instant::now())
    }

    /// Reports a failed attempt as of `now`
    ///
    /// Transient failures count against the domain's circuit. Permanent and
    /// structural failures show the domain is answering, so they count as a
    /// success for the circuit even though the job itself failed.
    ///
    /// If the dead-letter store cannot be written the job goes back to the
    /// ready set and the storage error is returned; callers must treat it as
    /// fatal.
    pub fn fail_at(&self, id: JobId, failure: JobFailure, now: Instant) -> QueueResult<FailOutcome> {
        let _gate = self.shared_gate();
        let domain = self.domain_of(id)?;
        let lane = self.lane(&domain);
        let mut lane = lock_lane(&lane);

        lane.check_leased(id)?;
        lane.leases.remove(&id);
        let Some(mut job) = lane.jobs.remove(&id) else {
            return Err(QueueError::UnknownJob(id));
        };
        job.record_error(failure.kind, &failure.message);
        job.leased_at = None;
        job.leased_by = None;

        match failure.kind {
            ErrorKind::Transient => self.tracker.record_failure(&domain, now),
            ErrorKind::Permanent | ErrorKind::Structural => self.tracker.record_success(&domain),
        }
        if let Some(hint) = failure.retry_after {
            self.tracker.defer(&domain, now + hint);
        }

        if failure.retryable && job.attempts < self.settings.max_attempts {
            let delay = self
                .backoff
                .delay(job.attempts)
                .max(failure.retry_after.unwrap_or_default());
            debug!(
                job = %id,
                attempt = job.attempts,
                delay_ms = delay.as_millis() as u64,
                "Retrying after {}",
                failure
            );
            lane.push_waiting(job, now + delay);
            drop(lane);
            self.tracker.count(&domain, DomainCounter::Retried);
            return Ok(FailOutcome::Retrying { delay });
        }

        let final_error = failure.to_string();
        match self.dead_letters.add(job.clone(), &final_error) {
            Ok(()) => {
                drop(lane);
                self.index.remove(&id);
                self.tracker.count(&domain, DomainCounter::DeadLettered);
                Ok(FailOutcome::DeadLettered)
            }
            Err(err) => {
                error!(job = %id, "Failed to store dead letter: {}", err);
                lane.push_ready(job);
                Err(QueueError::Storage(err))
            }
        }
    }

    /// Returns leases older than the lease timeout to the ready set
    ///
    /// The worker holding such a lease is presumed lost. Its attempt stays
    /// counted but is not reported to the circuit breaker.
    pub fn reap_expired(&self, now: Instant) -> Vec<JobId> {
        let _gate = self.shared_gate();
        let timeout = self.settings.lease_timeout;
        let mut reaped = Vec::new();

        for entry in self.lanes.iter() {
            let domain = entry.key();
            let mut lane = lock_lane(entry.value());
            let expired: Vec<JobId> = lane
                .leases
                .iter()
                .filter(|(_, lease)| now.saturating_duration_since(lease.leased_at) >= timeout)
                .map(|(id, _)| *id)
                .collect();

            for id in expired {
                if let Some(lease) = lane.release(id, "lease expired") {
                    if lease.admission == Admission::Probe {
                        self.tracker.release_probe(domain);
                    }
                    warn!(job = %id, domain = %domain, "Lease expired; job returned to queue");
                    reaped.push(id);
                }
            }
        }
        reaped
    }

    /// Stops handing out leases; enqueue, acknowledge and fail keep working
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns every outstanding lease to the ready set
    ///
    /// Used at the end of the shutdown grace period. Abandoned jobs keep
    /// their attempt count and are picked up again on resume.
    pub fn force_fail_leased(&self) -> usize {
        let _gate = self.shared_gate();
        let mut released = 0;

        for entry in self.lanes.iter() {
            let domain = entry.key();
            let mut lane = lock_lane(entry.value());
            let ids: Vec<JobId> = lane.leases.keys().copied().collect();
            for id in ids {
                if let Some(lease) = lane.release(id, "lease abandoned at shutdown") {
                    if lease.admission == Admission::Probe {
                        self.tracker.release_probe(domain);
                    }
                    released += 1;
                }
            }
        }
        if released > 0 {
            warn!("Force-failed {} outstanding lease(s)", released);
        }
        released
    }

    /// Takes a consistent snapshot of the frontier
    ///
    /// Blocks queue mutations while it runs. Leased jobs are recorded as
    /// pending so a crash after this point re-runs them.
    pub fn snapshot(&self, now: Instant) -> FrontierSnapshot {
        let _gate = self.gate.write().unwrap_or_else(PoisonError::into_inner);

        let mut jobs = Vec::new();
        for entry in self.lanes.iter() {
            let lane = lock_lane(entry.value());
            let retry_at: HashMap<JobId, Instant> =
                lane.waiting.iter().map(|&(at, id)| (id, at)).collect();

            for job in lane.jobs.values() {
                let mut job = job.clone();
                let ready_in_ms = retry_at
                    .get(&job.id)
                    .map_or(0, |at| at.saturating_duration_since(now).as_millis() as u64);
                if job.state == JobState::Leased {
                    job.state = JobState::Pending;
                    job.leased_at = None;
                    job.leased_by = None;
                }
                jobs.push(PendingJob { job, ready_in_ms });
            }
        }
        jobs.sort_by_key(|pending| pending.job.id);

        FrontierSnapshot {
            next_job_id: self.next_id.load(Ordering::SeqCst),
            seen: self.seen.snapshot(),
            jobs,
            domains: self.tracker.snapshot(now),
        }
    }

    /// Replaces the queue contents with a snapshot
    ///
    /// Jobs dead-lettered after the snapshot was taken are already in the
    /// dead-letter store and are left out; a letter is terminal until
    /// replayed.
    pub fn restore(&self, snapshot: FrontierSnapshot, now: Instant) -> QueueResult<()> {
        let lettered = self.dead_letters.ids()?;
        let _gate = self.gate.write().unwrap_or_else(PoisonError::into_inner);

        self.lanes.clear();
        self.index.clear();
        self.seen.restore(snapshot.seen);
        self.tracker.restore(&snapshot.domains, now);

        let mut restored = 0;
        for PendingJob { job, ready_in_ms } in snapshot.jobs {
            if lettered.contains(&job.id) {
                debug!(job = %job.id, "Skipping job dead-lettered after the snapshot");
                continue;
            }
            restored += 1;
            self.tracker.configure(&job.domain, None);
            self.index.insert(job.id, job.domain.clone());
            let lane = self.lane(&job.domain);
            let mut lane = lock_lane(&lane);
            if ready_in_ms > 0 {
                lane.push_waiting(job, now + Duration::from_millis(ready_in_ms));
            } else {
                lane.push_ready(job);
            }
        }

        self.next_id
            .fetch_max(snapshot.next_job_id, Ordering::SeqCst);
        info!(
            jobs = restored,
            seen = self.seen.len(),
            domains = self.tracker.len(),
            "Frontier restored"
        );
        Ok(())
    }

    /// Moves a dead-lettered job back into the queue with its attempts reset
    ///
    /// The job keeps its ID and its error history. Its URL is already in the
    /// seen-set for this epoch, so the seen-set is not consulted.
    pub fn replay(&self, id: JobId) -> QueueResult<JobId> {
        let _gate = self.shared_gate();
        if self.index.contains_key(&id) {
            return Err(QueueError::AlreadyQueued(id));
        }
        let letter = self
            .dead_letters
            .take(id)?
            .ok_or(QueueError::NotDeadLettered(id))?;

        let mut job = letter.job;
        job.attempts = 0;
        job.enqueued_at = Utc::now();
        job.leased_at = None;
        job.leased_by = None;
        self.tracker.configure(&job.domain, None);

        info!(job = %id, url = %job.url, "Replaying dead letter");
        self.insert_ready(job);
        Ok(id)
    }

    pub fn metrics(&self) -> FrontierMetrics {
        let mut domains: BTreeMap<String, DomainMetrics> = self
            .tracker
            .views()
            .into_iter()
            .map(|(domain, view)| {
                let metrics = DomainMetrics {
                    completed: view.completed,
                    dead_lettered: view.dead_lettered,
                    retries: view.retries,
                    circuit: Some(view.circuit),
                    min_interval_ms: view.min_interval.as_millis() as u64,
                    ..DomainMetrics::default()
                };
                (domain, metrics)
            })
            .collect();

        for entry in self.lanes.iter() {
            let lane = lock_lane(entry.value());
            let metrics = domains.entry(entry.key().clone()).or_default();
            metrics.pending = lane.ready.len() as u64;
            metrics.waiting = lane.waiting.len() as u64;
            metrics.leased = lane.leases.len() as u64;
        }

        let mut metrics = FrontierMetrics {
            seen_urls: self.seen.len() as u64,
            domains,
            transitions: self.tracker.transitions(METRICS_TRANSITIONS),
            leasing_closed: self.is_closed(),
            ..FrontierMetrics::default()
        };
        metrics.compute_totals();
        metrics
    }

    /// True when no job is pending, backing off or leased
    pub fn is_idle(&self) -> bool {
        self.lanes.iter().all(|entry| lock_lane(entry.value()).is_empty())
    }

    /// Jobs waiting for a lease, including those backing off
    pub fn pending_count(&self) -> usize {
        self.lanes
            .iter()
            .map(|entry| {
                let lane = lock_lane(entry.value());
                lane.ready.len() + lane.waiting.len()
            })
            .sum()
    }

    pub fn leased_count(&self) -> usize {
        self.lanes
            .iter()
            .map(|entry| lock_lane(entry.value()).leases.len())
            .sum()
    }

    /// Jobs acknowledged since this queue was created
    pub fn completed_total(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CircuitBreakerConfig;
    use crate::robots::{AllowAll, ConfigPolicy};
    use crate::state::CircuitStatus;
    use crate::storage::{lock, shared, MemoryStorage, SharedStorage};
    use std::collections::HashSet;

    fn settings() -> QueueSettings {
        QueueSettings {
            max_attempts: 3,
            lease_timeout: Duration::from_secs(60),
            max_depth: 2,
            discovered_priority_step: 1,
        }
    }

    fn build(
        min_interval: Duration,
        policy: Arc<dyn PolitenessSource>,
        storage: SharedStorage,
    ) -> JobQueue {
        let epoch = lock(&storage).create_epoch("test").unwrap();
        build_in_epoch(min_interval, policy, storage, epoch)
    }

    fn build_in_epoch(
        min_interval: Duration,
        policy: Arc<dyn PolitenessSource>,
        storage: SharedStorage,
        epoch: i64,
    ) -> JobQueue {
        let tracker = DomainTracker::new(
            min_interval,
            CircuitBreakerConfig {
                failure_threshold: 5,
                recovery_timeout_secs: 30,
                half_open_max_concurrent: 1,
            },
        );
        JobQueue::new(
            Arc::new(SeenSet::new()),
            Arc::new(tracker),
            policy,
            DeadLetterStore::new(storage, epoch),
            Backoff::new(Duration::from_millis(100), Duration::from_secs(1)),
            settings(),
        )
        .unwrap()
    }

    fn test_queue(min_interval: Duration) -> JobQueue {
        build(min_interval, Arc::new(AllowAll), shared(MemoryStorage::new()))
    }

    #[test]
    fn test_concurrent_duplicate_enqueue() {
        let queue = Arc::new(test_queue(Duration::ZERO));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || queue.enqueue("https://a.com/1", 0).unwrap())
            })
            .collect();

        let created = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|outcome| matches!(outcome, EnqueueOutcome::Enqueued(_)))
            .count();
        assert_eq!(created, 1);
        assert_eq!(queue.pending_count(), 1);
        assert_eq!(
            queue.enqueue("HTTPS://A.COM:443/1#top", 0).unwrap(),
            EnqueueOutcome::Duplicate
        );
    }

    #[test]
    fn test_malformed_url_rejected() {
        let queue = test_queue(Duration::ZERO);
        assert!(queue.enqueue("not a url", 0).is_err());
        assert!(queue.enqueue("ftp://a.com/", 0).is_err());
        assert!(queue.is_idle());
    }

    #[test]
    fn test_priority_then_enqueue_order() {
        let queue = test_queue(Duration::ZERO);
        let now = Instant::now();
        queue.enqueue("https://a.com/low", 5).unwrap();
        queue.enqueue("https://b.com/high", 1).unwrap();
        queue.enqueue("https://c.com/first", 3).unwrap();
        queue.enqueue("https://c.com/second", 3).unwrap();

        let order: Vec<String> = (0..4)
            .map(|w| queue.lease_at(w, now).unwrap().url)
            .collect();
        assert_eq!(order[0], "https://b.com/high");
        assert_eq!(order[1], "https://c.com/first");
        assert_eq!(order[3], "https://a.com/low");
        assert!(queue.lease_at(9, now).is_none());
    }

    #[test]
    fn test_pacing_blocks_same_domain() {
        let queue = test_queue(Duration::from_secs(2));
        let t0 = Instant::now();
        let first = queue.enqueue("https://a.com/1", 0).unwrap().job_id().unwrap();
        let second = queue.enqueue("https://a.com/2", 0).unwrap().job_id().unwrap();

        assert_eq!(queue.lease_at(0, t0).unwrap().id, first);
        assert!(queue.lease_at(1, t0 + Duration::from_secs(1)).is_none());
        assert_eq!(
            queue.lease_at(1, t0 + Duration::from_millis(2100)).unwrap().id,
            second
        );
    }

    #[test]
    fn test_concurrent_leases_are_unique() {
        let queue = Arc::new(test_queue(Duration::ZERO));
        for i in 0..50 {
            queue
                .enqueue(&format!("https://d{}.com/{}", i % 5, i), 0)
                .unwrap();
        }

        let now = Instant::now();
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    let mut ids = Vec::new();
                    while let Some(job) = queue.lease_at(worker, now) {
                        ids.push(job.id);
                    }
                    ids
                })
            })
            .collect();

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.join().unwrap());
        }
        let unique: HashSet<_> = all.iter().copied().collect();
        assert_eq!(all.len(), 50);
        assert_eq!(unique.len(), 50);
        assert_eq!(queue.leased_count(), 50);
    }

    #[test]
    fn test_retry_then_dead_letter() {
        let queue = test_queue(Duration::ZERO);
        let mut now = Instant::now();
        let id = queue.enqueue("https://a.com/x", 0).unwrap().job_id().unwrap();

        for attempt in 1..=3 {
            let job = queue.lease_at(0, now).unwrap();
            assert_eq!(job.attempts, attempt);
            let outcome = queue
                .fail_at(id, JobFailure::transient("HTTP 429"), now)
                .unwrap();
            if attempt < 3 {
                assert!(matches!(outcome, FailOutcome::Retrying { .. }));
                assert!(queue.lease_at(0, now).is_none());
                now += Duration::from_secs(1);
            } else {
                assert_eq!(outcome, FailOutcome::DeadLettered);
            }
        }

        assert!(queue.is_idle());
        assert!(queue.lease_at(0, now + Duration::from_secs(60)).is_none());
        let letters = queue.dead_letters().list(10).unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].job.errors.len(), 3);
        assert_eq!(letters[0].job.state, JobState::DeadLettered);
        assert_eq!(queue.metrics().totals.retries, 2);
    }

    #[test]
    fn test_permanent_failure_dead_letters_immediately() {
        let queue = test_queue(Duration::ZERO);
        let now = Instant::now();
        let id = queue.enqueue("https://a.com/gone", 0).unwrap().job_id().unwrap();
        queue.lease_at(0, now).unwrap();

        let outcome = queue
            .fail_at(id, JobFailure::permanent("HTTP 410"), now)
            .unwrap();
        assert_eq!(outcome, FailOutcome::DeadLettered);
        assert_eq!(queue.dead_letters().count().unwrap(), 1);
        assert_eq!(queue.tracker().status("a.com"), Some(CircuitStatus::Closed));
    }

    #[test]
    fn test_retry_after_defers_domain() {
        let queue = test_queue(Duration::ZERO);
        let now = Instant::now();
        let id = queue.enqueue("https://a.com/x", 0).unwrap().job_id().unwrap();
        queue.enqueue("https://a.com/y", 1).unwrap();
        queue.lease_at(0, now).unwrap();

        let failure =
            JobFailure::transient("HTTP 429").with_retry_after(Some(Duration::from_secs(10)));
        let outcome = queue.fail_at(id, failure, now).unwrap();
        assert_eq!(
            outcome,
            FailOutcome::Retrying {
                delay: Duration::from_secs(10)
            }
        );

        assert!(queue.lease_at(0, now + Duration::from_secs(9)).is_none());
        assert_eq!(
            queue.lease_at(0, now + Duration::from_secs(10)).unwrap().id,
            id
        );
    }

    #[test]
    fn test_circuit_opens_and_recovers() {
        let queue = test_queue(Duration::ZERO);
        let mut now = Instant::now();
        for i in 0..6 {
            queue.enqueue(&format!("https://b.com/{}", i), 0).unwrap();
        }

        for _ in 0..5 {
            let job = queue.lease_at(0, now).unwrap();
            queue
                .fail_at(job.id, JobFailure::transient("HTTP 503"), now)
                .unwrap();
        }
        assert_eq!(queue.tracker().status("b.com"), Some(CircuitStatus::Open));
        assert!(queue.lease_at(0, now + Duration::from_secs(29)).is_none());

        now += Duration::from_secs(30);
        let probe = queue.lease_at(0, now).unwrap();
        assert_eq!(queue.tracker().status("b.com"), Some(CircuitStatus::HalfOpen));
        assert!(queue.lease_at(1, now).is_none());

        queue.acknowledge(probe.id).unwrap();
        assert_eq!(queue.tracker().status("b.com"), Some(CircuitStatus::Closed));
        assert!(queue.lease_at(1, now).is_some());
    }

    #[test]
    fn test_reap_expired_returns_job() {
        let queue = test_queue(Duration::ZERO);
        let now = Instant::now();
        let id = queue.enqueue("https://a.com/x", 0).unwrap().job_id().unwrap();
        queue.lease_at(0, now).unwrap();

        assert!(queue.reap_expired(now + Duration::from_secs(59)).is_empty());
        assert_eq!(queue.reap_expired(now + Duration::from_secs(60)), vec![id]);
        assert!(matches!(
            queue.acknowledge(id),
            Err(QueueError::NotLeased { .. })
        ));

        let again = queue.lease_at(1, now + Duration::from_secs(61)).unwrap();
        assert_eq!(again.id, id);
        assert_eq!(again.attempts, 2);
    }

    #[test]
    fn test_acknowledge_errors() {
        let queue = test_queue(Duration::ZERO);
        assert!(matches!(
            queue.acknowledge(JobId(99)),
            Err(QueueError::UnknownJob(_))
        ));
        let id = queue.enqueue("https://a.com/x", 0).unwrap().job_id().unwrap();
        assert!(matches!(
            queue.acknowledge(id),
            Err(QueueError::NotLeased { .. })
        ));
    }

    #[test]
    fn test_close_and_force_fail() {
        let queue = test_queue(Duration::ZERO);
        let now = Instant::now();
        queue.enqueue("https://a.com/x", 0).unwrap();
        queue.enqueue("https://b.com/y", 0).unwrap();
        queue.lease_at(0, now).unwrap();

        queue.close();
        assert!(queue.lease_at(1, now).is_none());
        assert_eq!(queue.force_fail_leased(), 1);
        assert_eq!(queue.leased_count(), 0);
        assert_eq!(queue.pending_count(), 2);
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let queue = test_queue(Duration::ZERO);
        let now = Instant::now();
        for i in 0..4 {
            queue.enqueue(&format!("https://a.com/{}", i), 0).unwrap();
        }
        let done = queue.lease_at(0, now).unwrap();
        queue.acknowledge(done.id).unwrap();
        let in_flight = queue.lease_at(0, now).unwrap();

        let snapshot = queue.snapshot(now);
        assert_eq!(snapshot.jobs.len(), 3);
        assert_eq!(snapshot.seen.len(), 4);

        let restored = test_queue(Duration::ZERO);
        restored.restore(snapshot, now).unwrap();
        assert_eq!(restored.pending_count(), 3);
        assert_eq!(restored.seen().len(), 4);
        assert_eq!(
            restored.enqueue(&done.url, 0).unwrap(),
            EnqueueOutcome::Duplicate
        );

        let mut leased = HashSet::new();
        while let Some(job) = restored.lease_at(0, now) {
            assert_ne!(job.id, done.id);
            leased.insert(job.id);
        }
        assert!(leased.contains(&in_flight.id));

        let fresh = restored.enqueue("https://a.com/new", 0).unwrap();
        assert!(fresh.job_id().unwrap().0 > in_flight.id.0);
    }

    #[test]
    fn test_replay_resets_attempts() {
        let queue = test_queue(Duration::ZERO);
        let now = Instant::now();
        let id = queue.enqueue("https://a.com/x", 0).unwrap().job_id().unwrap();
        queue.lease_at(0, now).unwrap();
        queue
            .fail_at(id, JobFailure::permanent("HTTP 404"), now)
            .unwrap();

        assert!(matches!(
            queue.replay(JobId(42)),
            Err(QueueError::NotDeadLettered(_))
        ));
        assert_eq!(queue.replay(id).unwrap(), id);
        assert_eq!(queue.dead_letters().count().unwrap(), 0);

        let job = queue.lease_at(0, now).unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.errors.len(), 1);
    }

    #[test]
    fn test_restore_skips_jobs_dead_lettered_after_snapshot() {
        let storage = shared(MemoryStorage::new());
        let queue = build(Duration::ZERO, Arc::new(AllowAll), Arc::clone(&storage));
        let epoch = queue.dead_letters().epoch_id();
        let now = Instant::now();
        let id = queue.enqueue("https://a.com/x", 0).unwrap().job_id().unwrap();
        queue.enqueue("https://a.com/y", 0).unwrap();
        queue.lease_at(0, now).unwrap();

        // Crash window: the letter is durable, the checkpoint is older
        let snapshot = queue.snapshot(now);
        queue
            .fail_at(id, JobFailure::permanent("HTTP 404"), now)
            .unwrap();
        drop(queue);

        let restored = build_in_epoch(Duration::ZERO, Arc::new(AllowAll), storage, epoch);
        restored.restore(snapshot, now).unwrap();
        assert_eq!(restored.pending_count(), 1);
        assert_eq!(restored.dead_letters().count().unwrap(), 1);
        assert_eq!(
            restored.enqueue("https://a.com/x", 0).unwrap(),
            EnqueueOutcome::Duplicate
        );

        assert_eq!(restored.replay(id).unwrap(), id);
        let first = restored.lease_at(0, now).unwrap();
        let second = restored.lease_at(1, now).unwrap();
        assert_ne!(first.id, second.id);
        assert!(restored.lease_at(2, now).is_none());
    }

    #[test]
    fn test_replay_rejects_job_already_queued() {
        let queue = test_queue(Duration::ZERO);
        let now = Instant::now();
        let id = queue.enqueue("https://a.com/x", 0).unwrap().job_id().unwrap();
        let job = queue.lease_at(0, now).unwrap();
        queue.dead_letters().add(job, "permanent: HTTP 404").unwrap();

        assert!(matches!(
            queue.replay(id),
            Err(QueueError::AlreadyQueued(_))
        ));
        assert_eq!(queue.dead_letters().count().unwrap(), 1);
        assert_eq!(queue.leased_count(), 1);
    }

    #[test]
    fn test_dead_letter_storage_failure_is_fatal() {
        let memory = MemoryStorage::new();
        let switch = memory.fail_switch();
        let queue = build(Duration::ZERO, Arc::new(AllowAll), shared(memory));
        let now = Instant::now();
        let id = queue.enqueue("https://a.com/x", 0).unwrap().job_id().unwrap();
        queue.lease_at(0, now).unwrap();

        switch.store(true, Ordering::SeqCst);
        let err = queue
            .fail_at(id, JobFailure::permanent("HTTP 404"), now)
            .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(queue.pending_count(), 1);
    }

    #[test]
    fn test_policy_and_depth_limits() {
        let policy = ConfigPolicy::default()
            .deny("*.ads.com")
            .pace("slow.com", Duration::from_secs(5));
        let queue = build(
            Duration::from_secs(1),
            Arc::new(policy),
            shared(MemoryStorage::new()),
        );

        assert_eq!(
            queue.enqueue("https://x.ads.com/", 0).unwrap(),
            EnqueueOutcome::Denied
        );
        queue.enqueue("https://slow.com/", 0).unwrap();
        assert_eq!(
            queue.tracker().views()["slow.com"].min_interval,
            Duration::from_secs(5)
        );

        let mut parent = Job::new(JobId(1), "https://a.com/".into(), "a.com".into(), 4, 2);
        assert_eq!(
            queue.enqueue_child("https://a.com/deep", &parent).unwrap(),
            EnqueueOutcome::TooDeep
        );
        parent.depth = 1;
        let id = queue
            .enqueue_child("https://a.com/child", &parent)
            .unwrap()
            .job_id()
            .unwrap();
        let now = Instant::now();
        let leased: Vec<Job> = std::iter::from_fn(|| queue.lease_at(0, now)).collect();
        assert_eq!(leased.len(), 2);
        let child = leased.iter().find(|job| job.id == id).unwrap();
        assert_eq!(child.depth, 2);
        assert_eq!(child.priority, 5);
    }

    #[test]
    fn test_metrics_counts() {
        let queue = test_queue(Duration::ZERO);
        let now = Instant::now();
        queue.enqueue("https://a.com/1", 0).unwrap();
        queue.enqueue("https://a.com/2", 0).unwrap();
        queue.enqueue("https://b.com/1", 0).unwrap();
        let job = queue.lease_at(0, now).unwrap();
        queue.acknowledge(job.id).unwrap();
        queue.lease_at(0, now).unwrap();

        let metrics = queue.metrics();
        assert_eq!(metrics.seen_urls, 3);
        assert_eq!(metrics.totals.completed, 1);
        assert_eq!(metrics.totals.leased, 1);
        assert_eq!(metrics.totals.pending, 1);
        assert_eq!(queue.completed_total(), 1);
        assert!(!queue.is_idle());
    }
}
