//! Durable job record storage.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use oryxa_core::TenantId;

use super::types::{Job, JobId, JobStatus, TransitionError};

/// Job store abstraction: the single source of truth for job state.
///
/// Transitions are applied atomically per job, so several workers may share
/// one store; `mark_processing` is the claim.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new pending job, assigning its `sequence`.
    async fn insert(&self, job: Job) -> Result<Job, JobStoreError>;

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// Conditional `pending → processing`.
    ///
    /// Returns `None` when the job is not pending (already claimed by another
    /// worker, or finished).
    async fn mark_processing(
        &self,
        job_id: JobId,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, JobStoreError>;

    /// Completing an already completed job returns it unchanged.
    async fn mark_completed(
        &self,
        job_id: JobId,
        result: JsonValue,
        now: DateTime<Utc>,
    ) -> Result<Job, JobStoreError>;

    /// Record a failed attempt. The returned job is `pending` when it will be
    /// retried and `failed` otherwise.
    async fn mark_failed(
        &self,
        job_id: JobId,
        error: &str,
        retryable: bool,
        backoff: Duration,
        now: DateTime<Utc>,
    ) -> Result<Job, JobStoreError>;

    /// Best eligible pending job: highest priority, then oldest.
    async fn next_pending(&self, now: DateTime<Utc>) -> Result<Option<Job>, JobStoreError>;

    /// Every pending job in dequeue order, eligible or not.
    async fn pending(&self) -> Result<Vec<Job>, JobStoreError>;

    /// Reset `processing` jobs last touched before `older_than` to `pending`.
    async fn reset_stale_processing(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Job>, JobStoreError>;

    async fn counts(&self) -> Result<JobCounts, JobStoreError>;

    /// Most recent jobs of a tenant, newest first.
    async fn list_for_tenant(
        &self,
        tenant_id: TenantId,
        limit: usize,
    ) -> Result<Vec<Job>, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Number of job records per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

impl JobCounts {
    pub fn add(&mut self, status: JobStatus, n: u64) {
        match status {
            JobStatus::Pending => self.pending += n,
            JobStatus::Processing => self.processing += n,
            JobStatus::Completed => self.completed += n,
            JobStatus::Failed => self.failed += n,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<JobId, Job>,
    next_sequence: u64,
}

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    inner: RwLock<Inner>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn update<T>(
        &self,
        job_id: JobId,
        apply: impl FnOnce(&mut Job) -> Result<T, TransitionError>,
    ) -> Result<Job, JobStoreError> {
        let mut inner = self.write();
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or(JobStoreError::NotFound(job_id))?;
        // Apply to a copy so a rejected transition leaves the record untouched.
        let mut updated = job.clone();
        apply(&mut updated)?;
        *job = updated.clone();
        Ok(updated)
    }

    fn sorted_pending(inner: &Inner) -> Vec<&Job> {
        let mut pending: Vec<&Job> = inner
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .collect();
        pending.sort_by_key(|j| j.order_key());
        pending
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, mut job: Job) -> Result<Job, JobStoreError> {
        let mut inner = self.write();
        if inner.jobs.contains_key(&job.id) {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        inner.next_sequence += 1;
        job.sequence = inner.next_sequence;
        inner.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        Ok(self.read().jobs.get(&job_id).cloned())
    }

    async fn mark_processing(
        &self,
        job_id: JobId,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, JobStoreError> {
        let mut inner = self.write();
        match inner.jobs.get_mut(&job_id) {
            Some(job) if job.status == JobStatus::Pending => {
                job.mark_processing(now)?;
                Ok(Some(job.clone()))
            }
            Some(_) => Ok(None),
            None => Err(JobStoreError::NotFound(job_id)),
        }
    }

    async fn mark_completed(
        &self,
        job_id: JobId,
        result: JsonValue,
        now: DateTime<Utc>,
    ) -> Result<Job, JobStoreError> {
        self.update(job_id, |job| job.mark_completed(result, now))
    }

    async fn mark_failed(
        &self,
        job_id: JobId,
        error: &str,
        retryable: bool,
        backoff: Duration,
        now: DateTime<Utc>,
    ) -> Result<Job, JobStoreError> {
        self.update(job_id, |job| job.mark_failed(error, retryable, backoff, now))
    }

    async fn next_pending(&self, now: DateTime<Utc>) -> Result<Option<Job>, JobStoreError> {
        let inner = self.read();
        Ok(Self::sorted_pending(&inner)
            .into_iter()
            .find(|j| j.is_eligible(now))
            .cloned())
    }

    async fn pending(&self) -> Result<Vec<Job>, JobStoreError> {
        let inner = self.read();
        Ok(Self::sorted_pending(&inner).into_iter().cloned().collect())
    }

    async fn reset_stale_processing(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Job>, JobStoreError> {
        let now = Utc::now();
        let mut inner = self.write();
        let mut reset = Vec::new();
        for job in inner.jobs.values_mut() {
            if job.status == JobStatus::Processing && job.updated_at < older_than {
                job.reset_to_pending(now)?;
                reset.push(job.clone());
            }
        }
        reset.sort_by_key(|j| j.order_key());
        Ok(reset)
    }

    async fn counts(&self) -> Result<JobCounts, JobStoreError> {
        let mut counts = JobCounts::default();
        for job in self.read().jobs.values() {
            counts.add(job.status, 1);
        }
        Ok(counts)
    }

    async fn list_for_tenant(
        &self,
        tenant_id: TenantId,
        limit: usize,
    ) -> Result<Vec<Job>, JobStoreError> {
        let inner = self.read();
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| j.tenant_id == tenant_id)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.sequence.cmp(&a.sequence));
        jobs.truncate(limit);
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::{NewJob, Priority};
    use serde_json::json;

    fn new_job(tenant: TenantId, priority: Priority) -> Job {
        let request = NewJob::new(tenant, "send_email", json!({"to": "a@b.com"})).with_priority(priority);
        Job::from_request(request, 3, Utc::now())
    }

    #[tokio::test]
    async fn insert_assigns_increasing_sequence() {
        let store = InMemoryJobStore::new();
        let tenant = TenantId::new();

        let a = store.insert(new_job(tenant, Priority::Normal)).await.unwrap();
        let b = store.insert(new_job(tenant, Priority::Normal)).await.unwrap();
        assert!(a.sequence < b.sequence);

        let dup = store.insert(a.clone()).await.unwrap_err();
        assert_eq!(dup, JobStoreError::AlreadyExists(a.id));
    }

    #[tokio::test]
    async fn claim_is_conditional() {
        let store = InMemoryJobStore::new();
        let job = store.insert(new_job(TenantId::new(), Priority::Normal)).await.unwrap();
        let now = Utc::now();

        let claimed = store.mark_processing(job.id, now).await.unwrap().unwrap();
        assert_eq!(claimed.status, JobStatus::Processing);
        assert_eq!(claimed.attempts, 1);

        // A second worker loses the race.
        assert!(store.mark_processing(job.id, now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn next_pending_prefers_priority_then_age() {
        let store = InMemoryJobStore::new();
        let tenant = TenantId::new();
        let low = store.insert(new_job(tenant, Priority::Low)).await.unwrap();
        let normal = store.insert(new_job(tenant, Priority::Normal)).await.unwrap();
        let high = store.insert(new_job(tenant, Priority::High)).await.unwrap();
        let now = Utc::now();

        let order: Vec<JobId> = store.pending().await.unwrap().iter().map(|j| j.id).collect();
        assert_eq!(order, vec![high.id, normal.id, low.id]);
        assert_eq!(store.next_pending(now).await.unwrap().unwrap().id, high.id);
    }

    #[tokio::test]
    async fn rejected_transition_leaves_record_untouched() {
        let store = InMemoryJobStore::new();
        let job = store.insert(new_job(TenantId::new(), Priority::Normal)).await.unwrap();

        let err = store
            .mark_completed(job.id, json!({}), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, JobStoreError::Transition(_)));
        assert_eq!(store.get(job.id).await.unwrap().unwrap(), job);
    }

    #[tokio::test]
    async fn stale_processing_jobs_are_reset() {
        let store = InMemoryJobStore::new();
        let job = store.insert(new_job(TenantId::new(), Priority::Normal)).await.unwrap();
        let long_ago = Utc::now() - chrono::Duration::hours(1);
        store.mark_processing(job.id, long_ago).await.unwrap();

        let reset = store
            .reset_stale_processing(Utc::now() - chrono::Duration::minutes(10))
            .await
            .unwrap();
        assert_eq!(reset.len(), 1);
        assert_eq!(reset[0].status, JobStatus::Pending);
        assert_eq!(reset[0].attempts, 1);
    }

    #[tokio::test]
    async fn counts_and_tenant_listing() {
        let store = InMemoryJobStore::new();
        let tenant = TenantId::new();
        let other = TenantId::new();
        let a = store.insert(new_job(tenant, Priority::Normal)).await.unwrap();
        store.insert(new_job(tenant, Priority::Normal)).await.unwrap();
        store.insert(new_job(other, Priority::Normal)).await.unwrap();
        store.mark_processing(a.id, Utc::now()).await.unwrap();

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.pending, 2);
        assert_eq!(counts.processing, 1);

        let listed = store.list_for_tenant(tenant, 10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|j| j.tenant_id == tenant));
        assert!(listed[0].sequence > listed[1].sequence);
    }
}
