//! Outbound webhook calls and their delivery log.
//!
//! A [`WebhookClient`] only fails on transport errors; any HTTP answer,
//! including 4xx/5xx, comes back as a [`WebhookResponse`] so the caller can log
//! it before deciding whether the job failed.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use oryxa_core::TenantId;

use super::{AdapterError, http_client};

#[derive(Debug, Clone, PartialEq)]
pub struct WebhookRequest {
    pub url: String,
    /// HTTP method name, upper case.
    pub method: String,
    pub headers: Map<String, JsonValue>,
    /// JSON body; ignored for `GET`.
    pub body: Option<JsonValue>,
}

impl WebhookRequest {
    pub fn sends_body(&self) -> bool {
        !self.method.eq_ignore_ascii_case("GET")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebhookResponse {
    pub status_code: u16,
    /// Body parsed as JSON, when it was JSON.
    pub json: Option<JsonValue>,
    pub text: String,
}

impl WebhookResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

#[async_trait]
pub trait WebhookClient: Send + Sync {
    async fn send(&self, request: &WebhookRequest) -> Result<WebhookResponse, AdapterError>;
}

pub struct HttpWebhookClient {
    client: reqwest::Client,
}

impl HttpWebhookClient {
    pub fn new() -> Result<Self, AdapterError> {
        Ok(Self {
            client: http_client()?,
        })
    }
}

#[async_trait]
impl WebhookClient for HttpWebhookClient {
    async fn send(&self, request: &WebhookRequest) -> Result<WebhookResponse, AdapterError> {
        let method = reqwest::Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| AdapterError::InvalidRequest(format!("bad method {}", request.method)))?;

        let mut builder = self
            .client
            .request(method, &request.url)
            .header("Content-Type", "application/json");
        for (name, value) in &request.headers {
            let value = match value {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            };
            builder = builder.header(name.as_str(), value);
        }
        if let Some(body) = request.body.as_ref().filter(|_| request.sends_body()) {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status_code = response.status().as_u16();
        let text = response.text().await?;
        let json = serde_json::from_str(&text).ok();
        Ok(WebhookResponse {
            status_code,
            json,
            text,
        })
    }
}

/// Test double answering every request with a fixed status and body.
pub struct RecordingWebhookClient {
    status_code: Mutex<u16>,
    body: JsonValue,
    requests: Mutex<Vec<WebhookRequest>>,
}

impl RecordingWebhookClient {
    pub fn new(status_code: u16, body: JsonValue) -> Self {
        Self {
            status_code: Mutex::new(status_code),
            body,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn set_status(&self, status_code: u16) {
        *self.status_code.lock().unwrap_or_else(PoisonError::into_inner) = status_code;
    }

    pub fn requests(&self) -> Vec<WebhookRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for RecordingWebhookClient {
    fn default() -> Self {
        Self::new(200, serde_json::json!({ "ok": true }))
    }
}

#[async_trait]
impl WebhookClient for RecordingWebhookClient {
    async fn send(&self, request: &WebhookRequest) -> Result<WebhookResponse, AdapterError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        let status_code = *self.status_code.lock().unwrap_or_else(PoisonError::into_inner);
        tracing::info!(url = %request.url, method = %request.method, status_code, "webhook recorded");
        Ok(WebhookResponse {
            status_code,
            json: Some(self.body.clone()),
            text: self.body.to_string(),
        })
    }
}

/// One delivery attempt, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookLog {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub endpoint: String,
    pub method: String,
    pub headers: Map<String, JsonValue>,
    pub body: Option<JsonValue>,
    pub response: Option<JsonValue>,
    pub status_code: Option<u16>,
    pub success: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl WebhookLog {
    /// Log row for a request that got an HTTP answer.
    pub fn answered(
        tenant_id: TenantId,
        request: &WebhookRequest,
        response: &WebhookResponse,
        at: DateTime<Utc>,
    ) -> Self {
        let success = response.is_success();
        Self {
            id: Uuid::now_v7(),
            tenant_id,
            endpoint: request.url.clone(),
            method: request.method.clone(),
            headers: request.headers.clone(),
            body: request.body.clone(),
            response: response.json.clone(),
            status_code: Some(response.status_code),
            success,
            error: (!success).then(|| response.text.clone()),
            created_at: at,
        }
    }

    /// Log row for a request that never got an answer.
    pub fn unreachable(
        tenant_id: TenantId,
        request: &WebhookRequest,
        error: &AdapterError,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            tenant_id,
            endpoint: request.url.clone(),
            method: request.method.clone(),
            headers: request.headers.clone(),
            body: request.body.clone(),
            response: None,
            status_code: None,
            success: false,
            error: Some(error.to_string()),
            created_at: at,
        }
    }
}

#[async_trait]
pub trait WebhookLogSink: Send + Sync {
    async fn record(&self, log: WebhookLog) -> Result<(), AdapterError>;
}

#[derive(Default)]
pub struct InMemoryWebhookLogSink {
    logs: Mutex<Vec<WebhookLog>>,
}

impl InMemoryWebhookLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn logs(&self) -> Vec<WebhookLog> {
        self.logs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl WebhookLogSink for InMemoryWebhookLogSink {
    async fn record(&self, log: WebhookLog) -> Result<(), AdapterError> {
        self.logs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(log);
        Ok(())
    }
}

/// `webhook_logs` table.
#[derive(Debug, Clone)]
pub struct PostgresWebhookLogSink {
    pool: Arc<PgPool>,
}

impl PostgresWebhookLogSink {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl WebhookLogSink for PostgresWebhookLogSink {
    #[instrument(skip(self, log), fields(endpoint = %log.endpoint, success = log.success), err)]
    async fn record(&self, log: WebhookLog) -> Result<(), AdapterError> {
        sqlx::query(
            r#"
            INSERT INTO webhook_logs (
                id, tenant_id, endpoint, method, headers, body, response,
                status_code, success, error, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(log.id)
        .bind(log.tenant_id.as_uuid())
        .bind(&log.endpoint)
        .bind(&log.method)
        .bind(JsonValue::Object(log.headers))
        .bind(&log.body)
        .bind(&log.response)
        .bind(log.status_code.map(i32::from))
        .bind(log.success)
        .bind(&log.error)
        .bind(log.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| AdapterError::Storage(format!("insert webhook log: {e}")))?;
        Ok(())
    }
}
