//! Priority job queue over a durable store.
//!
//! The store holds the truth about every job. A [`PendingJobSource`] decides
//! which pending job is handed out next:
//!
//! - [`LocalPendingQueue`] keeps a process-local ordered index, refilled from
//!   the store by [`JobQueue::recover`] and [`JobQueue::reconcile`];
//! - [`StorePendingSource`] asks the store directly, for several workers
//!   sharing one database.
//!
//! Either way a job only runs after the store's conditional claim
//! ([`JobQueue::mark_processing`]) succeeds.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use oryxa_core::TenantId;

use super::error::JobError;
use super::store::{JobStore, JobStoreError};
use super::types::{Job, JobId, JobStatus, NewJob, RetryPolicy};

/// Where the next job to run comes from.
#[async_trait]
pub trait PendingJobSource: Send + Sync {
    /// Make a pending job available. Sources reading the store directly ignore it.
    async fn offer(&self, job: &Job);

    /// Id of the best job eligible at `now`, removed from the source.
    async fn next(&self, now: DateTime<Utc>) -> Result<Option<JobId>, JobStoreError>;

    /// Whether the source already tracks `job_id`.
    async fn holds(&self, job_id: JobId) -> bool;

    /// Number of jobs tracked locally.
    async fn tracked(&self) -> usize;
}

#[derive(Debug, Clone, Copy)]
struct LocalEntry {
    id: JobId,
    available_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct LocalState {
    /// Keyed by `(priority rank, sequence)`.
    ordered: BTreeMap<(u8, u64), LocalEntry>,
    keys: HashMap<JobId, (u8, u64)>,
}

/// Process-local priority index: strict priority, FIFO within a priority.
#[derive(Debug, Default)]
pub struct LocalPendingQueue {
    state: Mutex<LocalState>,
}

impl LocalPendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, LocalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PendingJobSource for LocalPendingQueue {
    async fn offer(&self, job: &Job) {
        let key = job.order_key();
        let mut state = self.state();
        if let Some(old) = state.keys.insert(job.id, key) {
            state.ordered.remove(&old);
        }
        state.ordered.insert(
            key,
            LocalEntry {
                id: job.id,
                available_at: job.available_at,
            },
        );
    }

    async fn next(&self, now: DateTime<Utc>) -> Result<Option<JobId>, JobStoreError> {
        let mut state = self.state();
        let key = state
            .ordered
            .iter()
            .find(|(_, entry)| entry.available_at.is_none_or(|at| at <= now))
            .map(|(key, _)| *key);

        Ok(key.and_then(|key| {
            let entry = state.ordered.remove(&key)?;
            state.keys.remove(&entry.id);
            Some(entry.id)
        }))
    }

    async fn holds(&self, job_id: JobId) -> bool {
        self.state().keys.contains_key(&job_id)
    }

    async fn tracked(&self) -> usize {
        self.state().ordered.len()
    }
}

/// Reads the next job straight from a shared durable store.
pub struct StorePendingSource {
    store: Arc<dyn JobStore>,
}

impl StorePendingSource {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PendingJobSource for StorePendingSource {
    async fn offer(&self, _job: &Job) {}

    async fn next(&self, now: DateTime<Utc>) -> Result<Option<JobId>, JobStoreError> {
        Ok(self.store.next_pending(now).await?.map(|job| job.id))
    }

    async fn holds(&self, _job_id: JobId) -> bool {
        true
    }

    async fn tracked(&self) -> usize {
        0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] JobStoreError),
}

/// `{pendingCount, processingCount, timestamp}` from the durable records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub pending_count: u64,
    pub processing_count: u64,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of a recovery or reconcile pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Abandoned `processing` jobs put back to `pending`
    pub reset: usize,
    /// Pending jobs offered to the source
    pub requeued: usize,
}

/// Job queue: a durable store plus a pending source.
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    source: Arc<dyn PendingJobSource>,
    retry: RetryPolicy,
}

impl JobQueue {
    pub fn new(
        store: Arc<dyn JobStore>,
        source: Arc<dyn PendingJobSource>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            source,
            retry,
        }
    }

    /// Queue with a process-local pending index.
    pub fn local(store: Arc<dyn JobStore>, retry: RetryPolicy) -> Self {
        Self::new(store, Arc::new(LocalPendingQueue::new()), retry)
    }

    /// Queue that claims straight from a shared store.
    pub fn shared(store: Arc<dyn JobStore>, retry: RetryPolicy) -> Self {
        let source = Arc::new(StorePendingSource::new(store.clone()));
        Self::new(store, source, retry)
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Persist a pending job and make it available to workers.
    ///
    /// The job type is not checked here; unknown types fail at dispatch.
    pub async fn enqueue(&self, request: NewJob) -> Result<JobId, QueueError> {
        let job = Job::from_request(request, self.retry.default_max_retries, Utc::now());
        let job = self.store.insert(job).await?;
        self.source.offer(&job).await;

        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            tenant_id = %job.tenant_id,
            priority = job.priority.as_str(),
            "job enqueued"
        );
        Ok(job.id)
    }

    /// Next pending job, highest priority first, FIFO within a priority.
    ///
    /// Non-blocking; `None` when nothing is eligible. Entries whose durable
    /// record is no longer pending are dropped.
    pub async fn dequeue_next(&self) -> Result<Option<Job>, QueueError> {
        let now = Utc::now();
        while let Some(job_id) = self.source.next(now).await? {
            match self.store.get(job_id).await? {
                Some(job) if job.status == JobStatus::Pending => return Ok(Some(job)),
                Some(job) => {
                    debug!(job_id = %job_id, status = %job.status, "dropping stale queue entry");
                }
                None => warn!(job_id = %job_id, "queued job has no durable record"),
            }
        }
        Ok(None)
    }

    /// Claim a job for execution. `None` when another worker got it first.
    pub async fn mark_processing(&self, job_id: JobId) -> Result<Option<Job>, QueueError> {
        let claimed = self.store.mark_processing(job_id, Utc::now()).await?;
        if let Some(job) = &claimed {
            info!(
                job_id = %job.id,
                job_type = %job.job_type,
                attempt = job.attempts,
                "job started"
            );
        }
        Ok(claimed)
    }

    pub async fn mark_completed(&self, job_id: JobId, result: JsonValue) -> Result<Job, QueueError> {
        let job = self.store.mark_completed(job_id, result, Utc::now()).await?;
        info!(job_id = %job.id, job_type = %job.job_type, attempts = job.attempts, "job completed");
        Ok(job)
    }

    /// Record a failed attempt; a job that will be retried is re-offered
    /// right away (eligible after its backoff).
    pub async fn mark_failed(&self, job_id: JobId, error: &JobError) -> Result<Job, QueueError> {
        let attempts = self
            .store
            .get(job_id)
            .await?
            .ok_or(JobStoreError::NotFound(job_id))?
            .attempts;
        let backoff = self.retry.delay_for_attempt(attempts);
        let message = error.to_string();

        let job = self
            .store
            .mark_failed(job_id, &message, error.is_retryable(), backoff, Utc::now())
            .await?;

        if job.status == JobStatus::Pending {
            self.source.offer(&job).await;
            warn!(
                job_id = %job.id,
                job_type = %job.job_type,
                attempt = job.attempts,
                max_attempts = job.max_retries + 1,
                backoff_ms = backoff.as_millis() as u64,
                error = %message,
                "job failed, retry scheduled"
            );
        } else {
            warn!(
                job_id = %job.id,
                job_type = %job.job_type,
                attempts = job.attempts,
                error = %message,
                "job failed permanently"
            );
        }
        Ok(job)
    }

    pub async fn get_job_status(&self, job_id: JobId) -> Result<Option<Job>, QueueError> {
        Ok(self.store.get(job_id).await?)
    }

    /// Like [`get_job_status`](Self::get_job_status), hiding other tenants' jobs.
    pub async fn get_for_tenant(
        &self,
        tenant_id: TenantId,
        job_id: JobId,
    ) -> Result<Option<Job>, QueueError> {
        Ok(self
            .store
            .get(job_id)
            .await?
            .filter(|job| job.tenant_id == tenant_id))
    }

    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let counts = self.store.counts().await?;
        Ok(QueueStats {
            pending_count: counts.pending,
            processing_count: counts.processing,
            timestamp: Utc::now(),
        })
    }

    /// Startup pass: reset `processing` jobs untouched for `stale_after`
    /// (their worker died) and offer every durable pending job.
    pub async fn recover(&self, stale_after: Duration) -> Result<RecoveryReport, QueueError> {
        let cutoff = Utc::now() - chrono::Duration::from_std(stale_after).unwrap_or_default();
        let reset = self.store.reset_stale_processing(cutoff).await?;
        for job in &reset {
            warn!(job_id = %job.id, job_type = %job.job_type, "reset abandoned job to pending");
        }

        let pending = self.store.pending().await?;
        for job in &pending {
            self.source.offer(job).await;
        }

        let report = RecoveryReport {
            reset: reset.len(),
            requeued: pending.len(),
        };
        info!(reset = report.reset, requeued = report.requeued, "queue recovery complete");
        Ok(report)
    }

    /// Periodic pass: reset `processing` jobs untouched for `stale_after`
    /// and offer durable pending jobs the source doesn't hold.
    pub async fn reconcile(&self, stale_after: Duration) -> Result<RecoveryReport, QueueError> {
        let cutoff = Utc::now() - chrono::Duration::from_std(stale_after).unwrap_or_default();
        let reset = self.store.reset_stale_processing(cutoff).await?;
        for job in &reset {
            warn!(job_id = %job.id, job_type = %job.job_type, "reset stuck job to pending");
        }

        let mut requeued = 0;
        for job in self.store.pending().await? {
            if !self.source.holds(job.id).await {
                self.source.offer(&job).await;
                requeued += 1;
            }
        }

        let report = RecoveryReport {
            reset: reset.len(),
            requeued,
        };
        if report != RecoveryReport::default() {
            info!(reset = report.reset, requeued = report.requeued, "reconciled queue");
        }
        Ok(report)
    }

    pub async fn local_len(&self) -> usize {
        self.source.tracked().await
    }
}
