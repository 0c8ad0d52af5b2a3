//! Background job system: typed, tenant-scoped jobs with priorities, a
//! durable record per job, retry with backoff, and a worker loop.
//!
//! ## Components
//!
//! - `Job` / `NewJob`: job record and enqueue request
//! - `JobStore`: durable job records (in-memory or Postgres)
//! - `PendingJobSource`: where workers find the next job (process-local
//!   ordered index, or the shared store)
//! - `JobQueue`: store + source, owns the status transitions
//! - `JobHandler` / `HandlerRegistry`: per-type execution
//! - `Worker`: the processing loop

pub mod error;
pub mod handlers;
pub mod postgres;
pub mod queue;
pub mod store;
pub mod types;
pub mod worker;

pub use error::JobError;
pub use handlers::{HandlerDeps, HandlerRegistry, JobHandler};
pub use postgres::PostgresJobStore;
pub use queue::{
    JobQueue, LocalPendingQueue, PendingJobSource, QueueError, QueueStats, RecoveryReport,
    StorePendingSource,
};
pub use store::{InMemoryJobStore, JobCounts, JobStore, JobStoreError};
pub use types::{
    BackoffStrategy, Completion, EntityRef, Job, JobId, JobStatus, JobType, NewJob, Priority,
    RetryPolicy, TransitionError,
};
pub use worker::{RunOutcome, Worker, WorkerConfig, WorkerHandle, WorkerStats, spawn_reconciler};
