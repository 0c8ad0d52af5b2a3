//! Core job types and policies.

use core::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use oryxa_core::TenantId;

/// Unique job identifier, rendered as `job_<uuid>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(Uuid);

impl JobId {
    const PREFIX: &'static str = "job_";

    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", Self::PREFIX, self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    /// Accepts both `job_<uuid>` and a bare UUID.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let raw = s.strip_prefix(Self::PREFIX).unwrap_or(s);
        Uuid::parse_str(raw).map(Self)
    }
}

impl Serialize for JobId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for JobId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Job type, used to route a job to its handler.
///
/// Unrecognised keys are accepted at enqueue time and kept as `Unknown`; the
/// worker fails them permanently at dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobType {
    PdfGeneration,
    SendEmail,
    SendWhatsapp,
    SendWebhook,
    Unknown(String),
}

impl JobType {
    pub fn as_str(&self) -> &str {
        match self {
            JobType::PdfGeneration => "pdf_generation",
            JobType::SendEmail => "send_email",
            JobType::SendWhatsapp => "send_whatsapp",
            JobType::SendWebhook => "send_webhook",
            JobType::Unknown(key) => key,
        }
    }
}

impl From<&str> for JobType {
    fn from(value: &str) -> Self {
        match value {
            "pdf_generation" => JobType::PdfGeneration,
            "send_email" => JobType::SendEmail,
            "send_whatsapp" => JobType::SendWhatsapp,
            "send_webhook" => JobType::SendWebhook,
            other => JobType::Unknown(other.to_string()),
        }
    }
}

impl From<String> for JobType {
    fn from(value: String) -> Self {
        JobType::from(value.as_str())
    }
}

impl From<JobType> for String {
    fn from(value: JobType) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dequeue priority. `High` jobs always leave the queue before `Normal`,
/// and `Normal` before `Low`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    /// Sort rank; lower is dequeued first.
    pub fn rank(&self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Normal => 1,
            Priority::Low => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// Job lifecycle status.
///
/// `pending → processing → completed | failed`, with `processing → pending`
/// allowed while retries remain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Retried jobs are eligible again immediately
    None,
    /// Fixed delay between retries
    Fixed,
    /// Linear backoff: base * attempt
    Linear,
    /// Exponential backoff: base * 2^(attempt - 1)
    #[default]
    Exponential,
}

impl FromStr for BackoffStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(BackoffStrategy::None),
            "fixed" => Ok(BackoffStrategy::Fixed),
            "linear" => Ok(BackoffStrategy::Linear),
            "exponential" => Ok(BackoffStrategy::Exponential),
            other => Err(format!("unknown backoff strategy: {other}")),
        }
    }
}

/// Queue-wide retry policy. The retry *budget* is per job (`max_retries`);
/// the policy decides how long a retried job waits before it is eligible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Default `max_retries` for jobs enqueued without one
    pub default_max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            default_max_retries: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            strategy: BackoffStrategy::Exponential,
        }
    }
}

impl RetryPolicy {
    /// Policy without backoff, handy for tests.
    pub fn immediate(default_max_retries: u32) -> Self {
        Self {
            default_max_retries,
            strategy: BackoffStrategy::None,
            ..Default::default()
        }
    }

    /// Delay before a job that just failed its `attempt`-th attempt (1-indexed)
    /// becomes eligible again.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let delay = match self.strategy {
            BackoffStrategy::None => Duration::ZERO,
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Linear => self.base_delay.saturating_mul(attempt),
            BackoffStrategy::Exponential => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(31));
                self.base_delay.saturating_mul(factor)
            }
        };

        delay.min(self.max_delay)
    }
}

/// Business entity a job acts on, derived from `payload.invoiceId`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRef {
    pub entity_type: String,
    pub entity_id: String,
}

/// Enqueue request.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub tenant_id: TenantId,
    pub job_type: JobType,
    pub payload: JsonValue,
    pub priority: Priority,
    /// Falls back to the queue's default when `None`.
    pub max_retries: Option<u32>,
}

impl NewJob {
    pub fn new(tenant_id: TenantId, job_type: impl Into<JobType>, payload: JsonValue) -> Self {
        Self {
            tenant_id,
            job_type: job_type.into(),
            payload,
            priority: Priority::Normal,
            max_retries: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Durable job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub tenant_id: TenantId,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub payload: JsonValue,
    pub priority: Priority,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_retries: u32,
    /// Monotonic enqueue order, assigned by the store; FIFO tie-break.
    pub sequence: u64,
    pub entity: Option<EntityRef>,
    pub error: Option<String>,
    pub result: Option<JsonValue>,
    /// A retried job is not handed out before this instant.
    pub available_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Rejected status transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("job {job_id}: cannot move from {from} to {to}")]
pub struct TransitionError {
    pub job_id: JobId,
    pub from: JobStatus,
    pub to: JobStatus,
}

/// What `mark_completed` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Applied,
    /// The job was already completed; nothing changed.
    AlreadyCompleted,
}

impl Job {
    /// Build a pending job from an enqueue request. `sequence` is assigned by
    /// the store on insert.
    pub fn from_request(request: NewJob, default_max_retries: u32, now: DateTime<Utc>) -> Self {
        let entity = request
            .payload
            .get("invoiceId")
            .and_then(JsonValue::as_str)
            .filter(|id| !id.is_empty())
            .map(|id| EntityRef {
                entity_type: "invoice".to_string(),
                entity_id: id.to_string(),
            });

        Self {
            id: JobId::new(),
            tenant_id: request.tenant_id,
            job_type: request.job_type,
            payload: request.payload,
            priority: request.priority,
            status: JobStatus::Pending,
            attempts: 0,
            max_retries: request.max_retries.unwrap_or(default_max_retries),
            sequence: 0,
            entity,
            error: None,
            result: None,
            available_at: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    /// Pending and past any retry backoff.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.available_at.is_none_or(|at| at <= now)
    }

    fn reject(&self, to: JobStatus) -> TransitionError {
        TransitionError {
            job_id: self.id,
            from: self.status,
            to,
        }
    }

    /// `pending → processing`; counts one attempt.
    pub fn mark_processing(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.status != JobStatus::Pending {
            return Err(self.reject(JobStatus::Processing));
        }
        self.status = JobStatus::Processing;
        self.attempts += 1;
        self.started_at = Some(now);
        self.available_at = None;
        self.updated_at = now;
        Ok(())
    }

    /// `processing → completed`. Completing an already completed job is a no-op.
    pub fn mark_completed(
        &mut self,
        result: JsonValue,
        now: DateTime<Utc>,
    ) -> Result<Completion, TransitionError> {
        match self.status {
            JobStatus::Completed => Ok(Completion::AlreadyCompleted),
            JobStatus::Processing => {
                self.status = JobStatus::Completed;
                self.result = Some(result);
                self.error = None;
                self.completed_at = Some(now);
                self.updated_at = now;
                Ok(Completion::Applied)
            }
            _ => Err(self.reject(JobStatus::Completed)),
        }
    }

    /// `processing → pending` while retries remain and the error is retryable,
    /// `processing → failed` otherwise.
    ///
    /// A job is retried while `attempts <= max_retries`, i.e. it gets at most
    /// `max_retries + 1` attempts.
    pub fn mark_failed(
        &mut self,
        error: impl Into<String>,
        retryable: bool,
        backoff: Duration,
        now: DateTime<Utc>,
    ) -> Result<JobStatus, TransitionError> {
        if self.status != JobStatus::Processing {
            return Err(self.reject(JobStatus::Failed));
        }

        self.error = Some(error.into());
        self.updated_at = now;

        if retryable && self.attempts <= self.max_retries {
            self.status = JobStatus::Pending;
            self.available_at = (!backoff.is_zero())
                .then(|| now + chrono::Duration::from_std(backoff).unwrap_or_default());
        } else {
            self.status = JobStatus::Failed;
            self.completed_at = Some(now);
        }
        Ok(self.status)
    }

    /// Put a `processing` job abandoned by a dead worker back to `pending`.
    /// The interrupted attempt stays counted.
    pub fn reset_to_pending(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.status != JobStatus::Processing {
            return Err(self.reject(JobStatus::Pending));
        }
        self.status = JobStatus::Pending;
        self.updated_at = now;
        Ok(())
    }

    /// Sort key for dequeue order.
    pub fn order_key(&self) -> (u8, u64) {
        (self.priority.rank(), self.sequence)
    }
}
