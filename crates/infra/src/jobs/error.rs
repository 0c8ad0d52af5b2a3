//! Job handler failure taxonomy.

use std::time::Duration;

use crate::adapters::AdapterError;
use crate::records::InvoiceStoreError;

use super::types::JobType;

/// Why a job attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    /// Malformed payload; retrying won't help.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Email/WhatsApp/storage adapter failure.
    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("webhook failed: {message}")]
    Webhook {
        status_code: Option<u16>,
        message: String,
    },

    #[error("Unknown job type: {0}")]
    UnknownJobType(JobType),

    #[error("job timed out after {0:?}")]
    Timeout(Duration),

    #[error("storage error: {0}")]
    Storage(String),

    /// The handler task panicked or was torn down.
    #[error("handler aborted: {0}")]
    Aborted(String),
}

impl JobError {
    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        JobError::InvalidPayload(msg.into())
    }

    /// Downstream and infrastructure failures are retried; bad input,
    /// missing entities and unroutable jobs are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            JobError::Delivery(_)
                | JobError::Webhook { .. }
                | JobError::Timeout(_)
                | JobError::Storage(_)
        )
    }
}

impl From<AdapterError> for JobError {
    fn from(err: AdapterError) -> Self {
        JobError::Delivery(err.to_string())
    }
}

impl From<InvoiceStoreError> for JobError {
    fn from(err: InvoiceStoreError) -> Self {
        match err {
            InvoiceStoreError::NotFound(id) => JobError::NotFound {
                entity: "invoice",
                id: id.to_string(),
            },
            other => JobError::Storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_downstream_failures_are_retryable() {
        assert!(JobError::Delivery("smtp".into()).is_retryable());
        assert!(JobError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(
            JobError::Webhook {
                status_code: Some(502),
                message: "bad gateway".into()
            }
            .is_retryable()
        );
        assert!(!JobError::invalid_payload("missing to").is_retryable());
        assert!(!JobError::Aborted("index out of bounds".into()).is_retryable());
        assert!(!JobError::UnknownJobType(JobType::Unknown("x".into())).is_retryable());
        assert!(
            !JobError::NotFound {
                entity: "invoice",
                id: "1".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn unknown_type_message_names_the_key() {
        let err = JobError::UnknownJobType(JobType::Unknown("generate_report".into()));
        assert_eq!(err.to_string(), "Unknown job type: generate_report");
    }
}
