//! Worker loop: take the next job, run its handler, record the outcome.
//!
//! One job at a time per worker. Cancellation stops the loop between jobs;
//! a job already running is allowed to finish and record its outcome.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::JobError;
use super::handlers::HandlerRegistry;
use super::queue::{JobQueue, QueueError};
use super::types::{Job, JobId, JobStatus};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Sleep when the queue is empty.
    pub poll_interval: Duration,
    /// Sleep after a loop-level fault (store unreachable, ...).
    pub fault_backoff: Duration,
    /// Per-job execution limit; `None` disables it.
    pub job_timeout: Option<Duration>,
    /// Name for logging.
    pub name: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            fault_backoff: Duration::from_secs(5),
            job_timeout: Some(Duration::from_secs(300)),
            name: "worker".to_string(),
        }
    }
}

impl WorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    /// Attempts that ended the job in `failed`.
    pub jobs_failed: u64,
    /// Attempts that failed and were scheduled for retry.
    pub jobs_retried: u64,
    pub uptime_secs: u64,
}

/// What a single [`Worker::run_once`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Nothing eligible.
    Idle,
    /// Another worker claimed the job first.
    Lost(JobId),
    Completed(JobId),
    Retrying(JobId),
    Failed(JobId),
}

pub struct Worker {
    queue: Arc<JobQueue>,
    handlers: HandlerRegistry,
    config: WorkerConfig,
    stats: Arc<Mutex<WorkerStats>>,
    started: Instant,
}

impl Worker {
    pub fn new(queue: Arc<JobQueue>, handlers: HandlerRegistry, config: WorkerConfig) -> Self {
        Self {
            queue,
            handlers,
            config,
            stats: Arc::new(Mutex::new(WorkerStats::default())),
            started: Instant::now(),
        }
    }

    pub fn stats(&self) -> WorkerStats {
        snapshot(&self.stats, self.started)
    }

    /// Process at most one job.
    pub async fn run_once(&self) -> Result<RunOutcome, QueueError> {
        let Some(next) = self.queue.dequeue_next().await? else {
            return Ok(RunOutcome::Idle);
        };
        let Some(job) = self.queue.mark_processing(next.id).await? else {
            debug!(worker = %self.config.name, job_id = %next.id, "job claimed elsewhere");
            return Ok(RunOutcome::Lost(next.id));
        };

        let result = self.execute(&job).await;
        let outcome = match result {
            Ok(value) => {
                self.queue.mark_completed(job.id, value).await?;
                RunOutcome::Completed(job.id)
            }
            Err(err) => {
                let updated = self.queue.mark_failed(job.id, &err).await?;
                if updated.status == JobStatus::Pending {
                    RunOutcome::Retrying(job.id)
                } else {
                    RunOutcome::Failed(job.id)
                }
            }
        };

        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        stats.jobs_processed += 1;
        match outcome {
            RunOutcome::Completed(_) => stats.jobs_succeeded += 1,
            RunOutcome::Retrying(_) => stats.jobs_retried += 1,
            RunOutcome::Failed(_) => stats.jobs_failed += 1,
            RunOutcome::Idle | RunOutcome::Lost(_) => {}
        }
        Ok(outcome)
    }

    async fn execute(&self, job: &Job) -> Result<serde_json::Value, JobError> {
        let Some(handler) = self.handlers.get(&job.job_type) else {
            warn!(job_id = %job.id, job_type = %job.job_type, "no handler for job type");
            return Err(JobError::UnknownJobType(job.job_type.clone()));
        };

        // A panic stays inside the handler task and fails only this job.
        let owned = job.clone();
        let task = tokio::spawn(async move { handler.handle(&owned).await });
        let abort = task.abort_handle();
        let joined = match self.config.job_timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    abort.abort();
                    return Err(JobError::Timeout(limit));
                }
            },
            None => task.await,
        };

        joined.unwrap_or_else(|e| {
            let reason = if e.is_panic() {
                panic_message(e.into_panic())
            } else {
                "cancelled".to_string()
            };
            error!(job_id = %job.id, job_type = %job.job_type, reason = %reason, "job handler aborted");
            Err(JobError::Aborted(reason))
        })
    }

    /// Run until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            worker = %self.config.name,
            poll_ms = self.config.poll_interval.as_millis() as u64,
            "worker started"
        );

        while !cancel.is_cancelled() {
            let pause = match self.run_once().await {
                Ok(RunOutcome::Idle) => self.config.poll_interval,
                Ok(_) => continue,
                Err(e) => {
                    error!(worker = %self.config.name, error = %e, "worker loop fault");
                    self.config.fault_backoff
                }
            };
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(pause) => {}
            }
        }

        let stats = self.stats();
        info!(
            worker = %self.config.name,
            processed = stats.jobs_processed,
            succeeded = stats.jobs_succeeded,
            failed = stats.jobs_failed,
            retried = stats.jobs_retried,
            "worker stopped"
        );
    }

    /// Spawn the loop on the current runtime.
    pub fn spawn(self, cancel: CancellationToken) -> WorkerHandle {
        let stats = self.stats.clone();
        let started = self.started;
        let join = tokio::spawn(self.run(cancel.clone()));
        WorkerHandle {
            cancel,
            join,
            stats,
            started,
        }
    }
}

/// Handle to a spawned worker.
#[derive(Debug)]
pub struct WorkerHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
    stats: Arc<Mutex<WorkerStats>>,
    started: Instant,
}

impl WorkerHandle {
    pub fn stats(&self) -> WorkerStats {
        snapshot(&self.stats, self.started)
    }

    /// Stop taking jobs and wait for the in-flight one.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            error!(error = %e, "worker task panicked");
        }
    }
}

fn snapshot(stats: &Mutex<WorkerStats>, started: Instant) -> WorkerStats {
    let mut stats = stats.lock().unwrap_or_else(PoisonError::into_inner).clone();
    stats.uptime_secs = started.elapsed().as_secs();
    stats
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(msg) => *msg,
        Err(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "panic".to_string()),
    }
}

/// Periodically release stuck `processing` jobs and offer durable pending
/// jobs the queue lost track of.
pub fn spawn_reconciler(
    queue: Arc<JobQueue>,
    interval: Duration,
    stale_after: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "queue reconciler started");
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("queue reconciler stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = queue.reconcile(stale_after).await {
                        error!(error = %e, "queue reconciliation failed");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use oryxa_core::TenantId;
    use serde_json::{Value as JsonValue, json};
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::jobs::handlers::JobHandler;
    use crate::jobs::store::{InMemoryJobStore, JobCounts, JobStore, JobStoreError};
    use crate::jobs::types::{JobType, NewJob, RetryPolicy};
    use chrono::{DateTime, Utc};
    use std::sync::atomic::AtomicBool;

    struct Succeed;

    #[async_trait]
    impl JobHandler for Succeed {
        async fn handle(&self, job: &Job) -> Result<JsonValue, JobError> {
            Ok(json!({ "echo": job.payload }))
        }
    }

    /// Fails with a delivery error the first `failures` times.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl JobHandler for Flaky {
        async fn handle(&self, _job: &Job) -> Result<JsonValue, JobError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(JobError::Delivery("provider unavailable".into()))
            } else {
                Ok(json!({ "messageId": "m-1" }))
            }
        }
    }

    struct Slow;

    #[async_trait]
    impl JobHandler for Slow {
        async fn handle(&self, _job: &Job) -> Result<JsonValue, JobError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(JsonValue::Null)
        }
    }

    struct Panics;

    #[async_trait]
    impl JobHandler for Panics {
        async fn handle(&self, job: &Job) -> Result<JsonValue, JobError> {
            let items = job.payload["items"].as_array().cloned().unwrap_or_default();
            Ok(items[0].clone())
        }
    }

    /// Loses the first completion write, as a dropped connection would.
    #[derive(Default)]
    struct FlakyCompletionStore {
        inner: InMemoryJobStore,
        failed_once: AtomicBool,
    }

    #[async_trait]
    impl JobStore for FlakyCompletionStore {
        async fn insert(&self, job: Job) -> Result<Job, JobStoreError> {
            self.inner.insert(job).await
        }

        async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
            self.inner.get(job_id).await
        }

        async fn mark_processing(
            &self,
            job_id: JobId,
            now: DateTime<Utc>,
        ) -> Result<Option<Job>, JobStoreError> {
            self.inner.mark_processing(job_id, now).await
        }

        async fn mark_completed(
            &self,
            job_id: JobId,
            result: JsonValue,
            now: DateTime<Utc>,
        ) -> Result<Job, JobStoreError> {
            if !self.failed_once.swap(true, Ordering::SeqCst) {
                return Err(JobStoreError::Storage("connection reset".into()));
            }
            self.inner.mark_completed(job_id, result, now).await
        }

        async fn mark_failed(
            &self,
            job_id: JobId,
            error: &str,
            retryable: bool,
            backoff: Duration,
            now: DateTime<Utc>,
        ) -> Result<Job, JobStoreError> {
            self.inner.mark_failed(job_id, error, retryable, backoff, now).await
        }

        async fn next_pending(&self, now: DateTime<Utc>) -> Result<Option<Job>, JobStoreError> {
            self.inner.next_pending(now).await
        }

        async fn pending(&self) -> Result<Vec<Job>, JobStoreError> {
            self.inner.pending().await
        }

        async fn reset_stale_processing(
            &self,
            older_than: DateTime<Utc>,
        ) -> Result<Vec<Job>, JobStoreError> {
            self.inner.reset_stale_processing(older_than).await
        }

        async fn counts(&self) -> Result<JobCounts, JobStoreError> {
            self.inner.counts().await
        }

        async fn list_for_tenant(
            &self,
            tenant_id: TenantId,
            limit: usize,
        ) -> Result<Vec<Job>, JobStoreError> {
            self.inner.list_for_tenant(tenant_id, limit).await
        }
    }

    fn queue() -> Arc<JobQueue> {
        Arc::new(JobQueue::local(
            Arc::new(InMemoryJobStore::new()),
            RetryPolicy::immediate(3),
        ))
    }

    async fn enqueue(queue: &JobQueue, job_type: &str) -> JobId {
        queue
            .enqueue(NewJob::new(TenantId::new(), job_type, json!({ "to": "a@b.test" })))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn completes_job_and_stores_result() {
        let queue = queue();
        let worker = Worker::new(
            queue.clone(),
            HandlerRegistry::new().with(JobType::SendEmail, Succeed),
            WorkerConfig::default(),
        );
        let id = enqueue(&queue, "send_email").await;

        assert_eq!(worker.run_once().await.unwrap(), RunOutcome::Completed(id));
        assert_eq!(worker.run_once().await.unwrap(), RunOutcome::Idle);

        let job = queue.get_job_status(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result, Some(json!({ "echo": { "to": "a@b.test" } })));
        assert_eq!(worker.stats().jobs_succeeded, 1);
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let queue = queue();
        let worker = Worker::new(
            queue.clone(),
            HandlerRegistry::new().with(
                JobType::SendEmail,
                Flaky {
                    failures: 2,
                    calls: AtomicU32::new(0),
                },
            ),
            WorkerConfig::default(),
        );
        let id = enqueue(&queue, "send_email").await;

        assert_eq!(worker.run_once().await.unwrap(), RunOutcome::Retrying(id));
        assert_eq!(worker.run_once().await.unwrap(), RunOutcome::Retrying(id));
        assert_eq!(worker.run_once().await.unwrap(), RunOutcome::Completed(id));

        let job = queue.get_job_status(id).await.unwrap().unwrap();
        assert_eq!(job.attempts, 3);
        let stats = worker.stats();
        assert_eq!((stats.jobs_processed, stats.jobs_retried, stats.jobs_succeeded), (3, 2, 1));
    }

    #[tokio::test]
    async fn unknown_type_fails_without_retry() {
        let queue = queue();
        let worker = Worker::new(queue.clone(), HandlerRegistry::new(), WorkerConfig::default());
        let id = enqueue(&queue, "generate_report").await;

        assert_eq!(worker.run_once().await.unwrap(), RunOutcome::Failed(id));

        let job = queue.get_job_status(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.error.as_deref(), Some("Unknown job type: generate_report"));
        assert_eq!(worker.run_once().await.unwrap(), RunOutcome::Idle);
    }

    #[tokio::test]
    async fn slow_handler_times_out_and_is_retried() {
        let queue = queue();
        let config = WorkerConfig {
            job_timeout: Some(Duration::from_millis(50)),
            ..WorkerConfig::default()
        };
        let worker = Worker::new(
            queue.clone(),
            HandlerRegistry::new().with(JobType::SendWebhook, Slow),
            config,
        );
        let id = enqueue(&queue, "send_webhook").await;

        assert_eq!(worker.run_once().await.unwrap(), RunOutcome::Retrying(id));
        let job = queue.get_job_status(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn panicking_handler_fails_only_its_job() {
        let queue = queue();
        let config = WorkerConfig {
            poll_interval: Duration::from_millis(10),
            ..WorkerConfig::default()
        };
        let worker = Worker::new(
            queue.clone(),
            HandlerRegistry::new()
                .with(JobType::PdfGeneration, Panics)
                .with(JobType::SendEmail, Succeed),
            config,
        );
        let bad = enqueue(&queue, "pdf_generation").await;
        let good = enqueue(&queue, "send_email").await;

        let handle = worker.spawn(CancellationToken::new());
        for _ in 0..100 {
            let stats = handle.stats();
            if stats.jobs_failed + stats.jobs_succeeded == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.shutdown().await;

        let bad = queue.get_job_status(bad).await.unwrap().unwrap();
        assert_eq!(bad.status, JobStatus::Failed);
        assert_eq!(bad.attempts, 1);
        assert!(bad.error.unwrap().starts_with("handler aborted"));
        let good = queue.get_job_status(good).await.unwrap().unwrap();
        assert_eq!(good.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn lost_completion_write_is_recovered_by_reconcile() {
        let queue = Arc::new(JobQueue::local(
            Arc::new(FlakyCompletionStore::default()),
            RetryPolicy::immediate(3),
        ));
        let worker = Worker::new(
            queue.clone(),
            HandlerRegistry::new().with(JobType::SendEmail, Succeed),
            WorkerConfig::default(),
        );
        let id = enqueue(&queue, "send_email").await;

        assert!(worker.run_once().await.is_err());
        assert_eq!(
            queue.get_job_status(id).await.unwrap().unwrap().status,
            JobStatus::Processing
        );

        let report = queue.reconcile(Duration::ZERO).await.unwrap();
        assert_eq!(report.reset, 1);
        assert_eq!(worker.run_once().await.unwrap(), RunOutcome::Completed(id));
        assert_eq!(
            queue.get_job_status(id).await.unwrap().unwrap().status,
            JobStatus::Completed
        );
    }

    #[tokio::test]
    async fn spawned_worker_drains_queue_and_shuts_down() {
        let queue = queue();
        let config = WorkerConfig {
            poll_interval: Duration::from_millis(10),
            ..WorkerConfig::default()
        };
        let worker = Worker::new(
            queue.clone(),
            HandlerRegistry::new().with(JobType::SendEmail, Succeed),
            config,
        );
        let ids = [
            enqueue(&queue, "send_email").await,
            enqueue(&queue, "send_email").await,
        ];

        let handle = worker.spawn(CancellationToken::new());
        for _ in 0..100 {
            if handle.stats().jobs_succeeded == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(handle.stats().jobs_succeeded, 2);
        handle.shutdown().await;

        for id in ids {
            let job = queue.get_job_status(id).await.unwrap().unwrap();
            assert_eq!(job.status, JobStatus::Completed);
        }
    }
}
