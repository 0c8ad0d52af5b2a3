//! Postgres-backed job store (`job_history` table).
//!
//! The claim is a conditional `UPDATE … WHERE status = 'pending' RETURNING`,
//! so any number of workers can share the table. Other transitions lock the
//! row (`FOR UPDATE`), apply the same rules as the in-memory store and write
//! the result back in one transaction.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use oryxa_core::TenantId;

use super::store::{JobCounts, JobStore, JobStoreError};
use super::types::{EntityRef, Job, JobId, JobStatus, JobType, Priority};

const COLUMNS: &str = r#"
    id, tenant_id, job_type, payload, priority, priority_rank, status, attempts,
    max_retries, sequence, entity_type, entity_id, error, result, available_at,
    created_at, started_at, completed_at, updated_at
"#;

#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    async fn lock_row(
        tx: &mut Transaction<'_, Postgres>,
        job_id: JobId,
    ) -> Result<Job, JobStoreError> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM job_history WHERE id = $1 FOR UPDATE"
        ))
        .bind(job_id.as_uuid())
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_row", e))?
        .ok_or(JobStoreError::NotFound(job_id))?;

        job_from_row(&row)
    }

    async fn write_back(
        tx: &mut Transaction<'_, Postgres>,
        job: &Job,
    ) -> Result<(), JobStoreError> {
        sqlx::query(
            r#"
            UPDATE job_history
            SET status = $2, attempts = $3, error = $4, result = $5,
                available_at = $6, started_at = $7, completed_at = $8, updated_at = $9
            WHERE id = $1
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.status.as_str())
        .bind(job.attempts as i32)
        .bind(&job.error)
        .bind(&job.result)
        .bind(job.available_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("write_back", e))?;
        Ok(())
    }

    /// Lock, apply, write back. Rejected transitions roll back.
    async fn transition<F>(&self, job_id: JobId, apply: F) -> Result<Job, JobStoreError>
    where
        F: FnOnce(&mut Job) -> Result<bool, JobStoreError> + Send,
    {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let mut job = Self::lock_row(&mut tx, job_id).await?;
        let changed = apply(&mut job)?;
        if changed {
            Self::write_back(&mut tx, &job).await?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;
        Ok(job)
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.id, job_type = %job.job_type), err)]
    async fn insert(&self, job: Job) -> Result<Job, JobStoreError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO job_history (
                id, tenant_id, job_type, payload, priority, priority_rank, status, attempts,
                max_retries, entity_type, entity_id, error, result, available_at,
                created_at, started_at, completed_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(job.id.as_uuid())
        .bind(job.tenant_id.as_uuid())
        .bind(job.job_type.as_str())
        .bind(&job.payload)
        .bind(job.priority.as_str())
        .bind(job.priority.rank() as i16)
        .bind(job.status.as_str())
        .bind(job.attempts as i32)
        .bind(job.max_retries as i32)
        .bind(job.entity.as_ref().map(|e| e.entity_type.as_str()))
        .bind(job.entity.as_ref().map(|e| e.entity_id.as_str()))
        .bind(&job.error)
        .bind(&job.result)
        .bind(job.available_at)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.updated_at)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| match map_sqlx_error("insert", e) {
            JobStoreError::AlreadyExists(_) => JobStoreError::AlreadyExists(job.id),
            other => other,
        })?;

        job_from_row(&row)
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM job_history WHERE id = $1"))
            .bind(job_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;

        row.as_ref().map(job_from_row).transpose()
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn mark_processing(
        &self,
        job_id: JobId,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE job_history
            SET status = 'processing', attempts = attempts + 1, started_at = $2,
                available_at = NULL, updated_at = $2
            WHERE id = $1 AND status = 'pending'
            RETURNING {COLUMNS}
            "#
        ))
        .bind(job_id.as_uuid())
        .bind(now)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_processing", e))?;

        match row {
            Some(row) => job_from_row(&row).map(Some),
            None if self.get(job_id).await?.is_none() => Err(JobStoreError::NotFound(job_id)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, result), fields(job_id = %job_id), err)]
    async fn mark_completed(
        &self,
        job_id: JobId,
        result: JsonValue,
        now: DateTime<Utc>,
    ) -> Result<Job, JobStoreError> {
        self.transition(job_id, move |job| {
            let completion = job.mark_completed(result, now)?;
            Ok(completion == super::types::Completion::Applied)
        })
        .await
    }

    #[instrument(skip(self, error), fields(job_id = %job_id), err)]
    async fn mark_failed(
        &self,
        job_id: JobId,
        error: &str,
        retryable: bool,
        backoff: Duration,
        now: DateTime<Utc>,
    ) -> Result<Job, JobStoreError> {
        let error = error.to_string();
        self.transition(job_id, move |job| {
            job.mark_failed(error, retryable, backoff, now)?;
            Ok(true)
        })
        .await
    }

    #[instrument(skip(self), err)]
    async fn next_pending(&self, now: DateTime<Utc>) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {COLUMNS} FROM job_history
            WHERE status = 'pending' AND (available_at IS NULL OR available_at <= $1)
            ORDER BY priority_rank ASC, sequence ASC
            LIMIT 1
            "#
        ))
        .bind(now)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("next_pending", e))?;

        row.as_ref().map(job_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    async fn pending(&self) -> Result<Vec<Job>, JobStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM job_history WHERE status = 'pending' ORDER BY priority_rank ASC, sequence ASC"
        ))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("pending", e))?;

        rows.iter().map(job_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn reset_stale_processing(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Job>, JobStoreError> {
        let rows = sqlx::query(&format!(
            r#"
            UPDATE job_history
            SET status = 'pending', updated_at = now()
            WHERE status = 'processing' AND updated_at < $1
            RETURNING {COLUMNS}
            "#
        ))
        .bind(older_than)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("reset_stale_processing", e))?;

        let mut jobs = rows.iter().map(job_from_row).collect::<Result<Vec<_>, _>>()?;
        jobs.sort_by_key(|j| j.order_key());
        Ok(jobs)
    }

    #[instrument(skip(self), err)]
    async fn counts(&self) -> Result<JobCounts, JobStoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM job_history GROUP BY status")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("counts", e))?;

        let mut counts = JobCounts::default();
        for row in rows {
            let status: String = row.try_get("status").map_err(|e| map_sqlx_error("counts", e))?;
            let n: i64 = row.try_get("n").map_err(|e| map_sqlx_error("counts", e))?;
            let status = status.parse::<JobStatus>().map_err(JobStoreError::Storage)?;
            counts.add(status, n.max(0) as u64);
        }
        Ok(counts)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn list_for_tenant(
        &self,
        tenant_id: TenantId,
        limit: usize,
    ) -> Result<Vec<Job>, JobStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM job_history WHERE tenant_id = $1 ORDER BY sequence DESC LIMIT $2"
        ))
        .bind(tenant_id.as_uuid())
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_for_tenant", e))?;

        rows.iter().map(job_from_row).collect()
    }
}

fn job_from_row(row: &PgRow) -> Result<Job, JobStoreError> {
    let decode = |e: sqlx::Error| JobStoreError::Storage(format!("failed to decode job row: {e}"));

    let id: Uuid = row.try_get("id").map_err(decode)?;
    let tenant_id: Uuid = row.try_get("tenant_id").map_err(decode)?;
    let job_type: String = row.try_get("job_type").map_err(decode)?;
    let priority: String = row.try_get("priority").map_err(decode)?;
    let status: String = row.try_get("status").map_err(decode)?;
    let attempts: i32 = row.try_get("attempts").map_err(decode)?;
    let max_retries: i32 = row.try_get("max_retries").map_err(decode)?;
    let sequence: i64 = row.try_get("sequence").map_err(decode)?;
    let entity_type: Option<String> = row.try_get("entity_type").map_err(decode)?;
    let entity_id: Option<String> = row.try_get("entity_id").map_err(decode)?;

    Ok(Job {
        id: JobId::from_uuid(id),
        tenant_id: TenantId::from_uuid(tenant_id),
        job_type: JobType::from(job_type),
        payload: row.try_get("payload").map_err(decode)?,
        priority: priority.parse::<Priority>().map_err(JobStoreError::Storage)?,
        status: status.parse::<JobStatus>().map_err(JobStoreError::Storage)?,
        attempts: attempts.max(0) as u32,
        max_retries: max_retries.max(0) as u32,
        sequence: sequence.max(0) as u64,
        entity: entity_type
            .zip(entity_id)
            .map(|(entity_type, entity_id)| EntityRef {
                entity_type,
                entity_id,
            }),
        error: row.try_get("error").map_err(decode)?,
        result: row.try_get("result").map_err(decode)?,
        available_at: row.try_get("available_at").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
        started_at: row.try_get("started_at").map_err(decode)?,
        completed_at: row.try_get("completed_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    match err {
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
            // Unique violation; the caller knows which id.
            JobStoreError::AlreadyExists(JobId::from_uuid(Uuid::nil()))
        }
        sqlx::Error::Database(db_err) => {
            JobStoreError::Storage(format!("database error in {operation}: {}", db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            JobStoreError::Storage(format!("connection pool closed in {operation}"))
        }
        other => JobStoreError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}
