//! Request/response bodies. JSON field names are camelCase; invoice records
//! keep their stored snake_case shape.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use oryxa_automations::{ActionResult, EventData};
use oryxa_infra::jobs::{JobId, Priority, QueueStats};
use oryxa_invoicing::Invoice;

use super::errors::{ApiError, ApiResult};

/// Unwrap a JSON body, turning extractor rejections into `validation_error`.
pub fn body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::Validation(rejection.body_text()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueJobRequest {
    #[serde(rename = "type")]
    pub job_type: String,
    #[serde(default = "empty_object")]
    pub payload: JsonValue,
    pub priority: Option<Priority>,
    pub max_retries: Option<u32>,
}

fn empty_object() -> JsonValue {
    JsonValue::Object(Default::default())
}

/// The stored invoice plus the PDF job queued for it.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceCreated {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub job_id: JobId,
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobAccepted {
    pub success: bool,
    pub job_id: JobId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl JobAccepted {
    pub fn new(job_id: JobId) -> Self {
        Self {
            success: true,
            job_id,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[derive(Debug, Deserialize)]
pub struct TriggerRequest {
    pub trigger: String,
    #[serde(default)]
    pub data: EventData,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulateResponse {
    pub success: bool,
    pub trigger: String,
    pub actions_triggered: Vec<ActionResult>,
    /// Milliseconds.
    pub execution_time: u64,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendMethod {
    Email,
    Whatsapp,
}

impl SendMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SendMethod::Email => "email",
            SendMethod::Whatsapp => "whatsapp",
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SendInvoiceRequest {
    pub method: SendMethod,
    pub recipient: String,
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub timestamp: DateTime<Utc>,
    pub queue: Option<QueueStats>,
}
