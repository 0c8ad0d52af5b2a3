use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use oryxa_core::DomainError;
use oryxa_infra::automations::EngineError;
use oryxa_infra::jobs::QueueError;
use oryxa_infra::records::InvoiceStoreError;

/// Error returned by route handlers; renders as `{error, message}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Invoices(#[from] InvoiceStoreError),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) => ApiError::Validation(msg),
            other => ApiError::Validation(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
            ApiError::NotFound(what) => {
                json_error(StatusCode::NOT_FOUND, "not_found", format!("{what} not found"))
            }
            ApiError::Invoices(InvoiceStoreError::NotFound(_)) => {
                json_error(StatusCode::NOT_FOUND, "not_found", "invoice not found")
            }
            ApiError::Invoices(InvoiceStoreError::AlreadyExists(id)) => json_error(
                StatusCode::CONFLICT,
                "conflict",
                format!("invoice {id} already exists"),
            ),
            other => {
                tracing::error!(error = %other, "request failed");
                json_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    other.to_string(),
                )
            }
        }
    }
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
