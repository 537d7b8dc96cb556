//! Per-key job coordinator.
//!
//! The coordinator is a map of independent single-worker queues keyed by
//! resource (an ELAN name, a device id, a `device:elan` pair):
//!
//! - At most one job per key executes at any instant.
//! - Jobs sharing a key run in submission order. A failing job is retried to
//!   exhaustion before the next job for that key starts.
//! - Keys never wait on each other. The key map is only locked (per shard)
//!   to make scheduling decisions, never while a job runs.
//!
//! Submission is fire-and-forget: failures surface through logs, the
//! [`JobCallbacks`] hook and [`JobCoordinatorStats`], never to the caller.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use std::collections::VecDeque;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::job::{Job, JobError, JobResult};
use crate::leadership::LeadershipCheck;
use crate::retry::RetryPolicy;

/// Configuration for a [`JobCoordinator`].
#[derive(Debug, Clone)]
pub struct JobCoordinatorConfig {
    /// Attempts granted to jobs submitted without an explicit budget.
    pub default_max_retries: u32,
    /// Backoff between attempts.
    pub retry_policy: RetryPolicy,
}

impl JobCoordinatorConfig {
    /// Default attempt budget.
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    /// Sets the default attempt budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.default_max_retries = max_retries;
        self
    }

    /// Sets the retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }
}

impl Default for JobCoordinatorConfig {
    fn default() -> Self {
        Self {
            default_max_retries: Self::DEFAULT_MAX_RETRIES,
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// Observer for job outcomes that never reach the submitter.
pub trait JobCallbacks: Send + Sync {
    /// Called exactly once when a job exhausts its retries.
    fn on_job_failed(&self, key: &str, job: &str, error: &JobError);

    /// Called when an owner-only job is dropped because this process does not own `key`.
    fn on_job_skipped(&self, _key: &str, _job: &str) {}
}

/// Point-in-time coordinator counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCoordinatorStats {
    /// Jobs accepted into a queue.
    pub submitted: u64,
    /// Attempts started (first runs and retries).
    pub executed: u64,
    /// Jobs that finished successfully.
    pub completed: u64,
    /// Retries scheduled after a failed attempt.
    pub retried: u64,
    /// Jobs dropped after exhausting retries.
    pub failed: u64,
    /// Owner-only jobs skipped on a non-owner.
    pub skipped: u64,
    /// Jobs queued behind a running job.
    pub pending: usize,
    /// Keys with a job in flight.
    pub active_keys: usize,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    executed: AtomicU64,
    completed: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

struct QueuedJob {
    job: Arc<dyn Job>,
    max_retries: u32,
    owner_only: bool,
}

/// Jobs waiting behind the one in flight. A key is present in the map exactly
/// while a worker is draining it.
#[derive(Default)]
struct KeyQueue {
    pending: VecDeque<QueuedJob>,
}

struct Inner {
    config: JobCoordinatorConfig,
    queues: DashMap<String, KeyQueue>,
    leadership: Option<Arc<dyn LeadershipCheck>>,
    callbacks: Option<Arc<dyn JobCallbacks>>,
    counters: Counters,
    idle: Notify,
}

/// Builder for a [`JobCoordinator`] with optional hooks.
pub struct JobCoordinatorBuilder {
    config: JobCoordinatorConfig,
    leadership: Option<Arc<dyn LeadershipCheck>>,
    callbacks: Option<Arc<dyn JobCallbacks>>,
}

impl JobCoordinatorBuilder {
    /// Enables owner-only submission backed by `leadership`.
    pub fn leadership(mut self, leadership: Arc<dyn LeadershipCheck>) -> Self {
        self.leadership = Some(leadership);
        self
    }

    /// Registers an outcome observer.
    pub fn callbacks(mut self, callbacks: Arc<dyn JobCallbacks>) -> Self {
        self.callbacks = Some(callbacks);
        self
    }

    /// Builds the coordinator.
    pub fn build(self) -> JobCoordinator {
        JobCoordinator {
            inner: Arc::new(Inner {
                config: self.config,
                queues: DashMap::new(),
                leadership: self.leadership,
                callbacks: self.callbacks,
                counters: Counters::default(),
                idle: Notify::new(),
            }),
        }
    }
}

/// Serializes jobs per resource key. Cheap to clone; clones share queues.
///
/// Submitting requires a tokio runtime: the first job for an idle key spawns
/// the worker that drains that key.
#[derive(Clone)]
pub struct JobCoordinator {
    inner: Arc<Inner>,
}

impl fmt::Debug for JobCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobCoordinator")
            .field("config", &self.inner.config)
            .field("active_keys", &self.inner.queues.len())
            .field("leader_affinity", &self.inner.leadership.is_some())
            .finish()
    }
}

impl JobCoordinator {
    /// Creates a coordinator without leadership or callback hooks.
    pub fn new(config: JobCoordinatorConfig) -> Self {
        Self::builder(config).build()
    }

    /// Starts building a coordinator.
    pub fn builder(config: JobCoordinatorConfig) -> JobCoordinatorBuilder {
        JobCoordinatorBuilder {
            config,
            leadership: None,
            callbacks: None,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &JobCoordinatorConfig {
        &self.inner.config
    }

    /// Submits `job` under `key` with the default retry budget.
    pub fn enqueue(&self, key: impl Into<String>, job: Arc<dyn Job>) {
        let max_retries = self.inner.config.default_max_retries;
        self.enqueue_with_retries(key, job, max_retries);
    }

    /// Submits `job` under `key`, attempting it at most `max_retries` times.
    pub fn enqueue_with_retries(&self, key: impl Into<String>, job: Arc<dyn Job>, max_retries: u32) {
        self.submit(
            key.into(),
            QueuedJob {
                job,
                max_retries,
                owner_only: false,
            },
        );
    }

    /// Submits `job` only if this process owns `key`.
    ///
    /// Ownership is checked now and again before every attempt; a job whose
    /// key is not owned is dropped without retry. Returns false if the job was
    /// not queued. Without a leadership hook every key is owned.
    pub fn enqueue_on_owner(&self, key: impl Into<String>, job: Arc<dyn Job>, max_retries: u32) -> bool {
        let key = key.into();
        if !self.inner.is_owner(&key) {
            self.inner.record_skip(&key, &job.name());
            return false;
        }
        self.submit(
            key,
            QueuedJob {
                job,
                max_retries,
                owner_only: true,
            },
        );
        true
    }

    /// Returns the number of jobs waiting behind the running one for `key`.
    pub fn pending_jobs(&self, key: &str) -> usize {
        self.inner
            .queues
            .get(key)
            .map(|queue| queue.pending.len())
            .unwrap_or(0)
    }

    /// Returns true while a job for `key` is in flight.
    pub fn is_busy(&self, key: &str) -> bool {
        self.inner.queues.contains_key(key)
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> JobCoordinatorStats {
        let counters = &self.inner.counters;
        JobCoordinatorStats {
            submitted: counters.submitted.load(Ordering::Relaxed),
            executed: counters.executed.load(Ordering::Relaxed),
            completed: counters.completed.load(Ordering::Relaxed),
            retried: counters.retried.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            skipped: counters.skipped.load(Ordering::Relaxed),
            pending: self.inner.queues.iter().map(|queue| queue.pending.len()).sum(),
            active_keys: self.inner.queues.len(),
        }
    }

    /// Waits until no key has a job in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.queues.is_empty() {
                return;
            }
            notified.await;
        }
    }

    fn submit(&self, key: String, queued: QueuedJob) {
        self.inner.counters.submitted.fetch_add(1, Ordering::Relaxed);

        let start = match self.inner.queues.entry(key.clone()) {
            Entry::Occupied(mut busy) => {
                debug!(key = %key, job = %queued.job.name(), "key busy, job queued");
                busy.get_mut().pending.push_back(queued);
                None
            }
            Entry::Vacant(idle) => {
                idle.insert(KeyQueue::default());
                Some(queued)
            }
        };

        if let Some(first) = start {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(inner.drain(key, first));
        }
    }
}

impl Inner {
    fn is_owner(&self, key: &str) -> bool {
        self.leadership
            .as_ref()
            .map_or(true, |leadership| leadership.is_owner(key))
    }

    fn record_skip(&self, key: &str, job: &str) {
        self.counters.skipped.fetch_add(1, Ordering::Relaxed);
        info!(key, job, "not the owner of key, job skipped");
        if let Some(callbacks) = &self.callbacks {
            callbacks.on_job_skipped(key, job);
        }
    }

    /// Worker for one key: runs `first`, then everything queued behind it.
    async fn drain(self: Arc<Self>, key: String, first: QueuedJob) {
        let mut current = first;
        loop {
            self.execute(&key, current).await;

            let next = match self.queues.entry(key.clone()) {
                Entry::Occupied(mut entry) => {
                    let next = entry.get_mut().pending.pop_front();
                    if next.is_none() {
                        entry.remove();
                    }
                    next
                }
                Entry::Vacant(_) => None,
            };

            match next {
                Some(job) => current = job,
                None => break,
            }
        }
        self.idle.notify_waiters();
    }

    async fn execute(&self, key: &str, queued: QueuedJob) {
        let name = queued.job.name();
        let mut retries_left = queued.max_retries.max(1);

        loop {
            if queued.owner_only && !self.is_owner(key) {
                self.record_skip(key, &name);
                return;
            }

            self.counters.executed.fetch_add(1, Ordering::Relaxed);
            debug!(key, job = %name, retries_left, "running job");

            let error = match guarded(queued.job.run(), &name).await {
                Ok(()) => {
                    self.counters.completed.fetch_add(1, Ordering::Relaxed);
                    debug!(key, job = %name, "job completed");
                    return;
                }
                Err(error) => error,
            };

            retries_left -= 1;
            if retries_left > 0 {
                let delay = self.config.retry_policy.delay_for(retries_left);
                self.counters.retried.fetch_add(1, Ordering::Relaxed);
                warn!(key, job = %name, %error, retries_left, ?delay, "job failed, retrying");
                tokio::time::sleep(delay).await;
                continue;
            }

            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            error!(key, job = %name, %error, "job failed, retries exhausted");
            if let Err(rollback_error) = guarded(queued.job.rollback(), &name).await {
                error!(key, job = %name, error = %rollback_error, "job rollback failed");
            }
            if let Some(callbacks) = &self.callbacks {
                callbacks.on_job_failed(key, &name, &error);
            }
            return;
        }
    }
}

/// Runs a job future, turning a panic into a failed attempt.
async fn guarded<F>(future: F, name: &str) -> JobResult<()>
where
    F: std::future::Future<Output = JobResult<()>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(_) => {
            error!(job = name, "job panicked");
            Err(JobError::internal(format!("job {} panicked", name)))
        }
    }
}
