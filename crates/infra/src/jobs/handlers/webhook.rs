use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value as JsonValue, json};
use tracing::{info, warn};

use crate::adapters::{WebhookClient, WebhookLog, WebhookLogSink, WebhookRequest};
use crate::jobs::error::JobError;
use crate::jobs::types::Job;

use super::{JobHandler, payload_str};

/// `send_webhook`: call the endpoint, log the exchange, fail on non-2xx.
pub struct SendWebhookHandler {
    client: Arc<dyn WebhookClient>,
    logs: Arc<dyn WebhookLogSink>,
}

impl SendWebhookHandler {
    pub fn new(client: Arc<dyn WebhookClient>, logs: Arc<dyn WebhookLogSink>) -> Self {
        Self { client, logs }
    }

    fn request(job: &Job) -> Result<WebhookRequest, JobError> {
        let payload = &job.payload;
        let url = payload_str(payload, "url")
            .ok_or_else(|| JobError::invalid_payload("missing url"))?;
        let headers = match payload.get("headers") {
            None | Some(JsonValue::Null) => Map::new(),
            Some(JsonValue::Object(map)) => map.clone(),
            Some(_) => return Err(JobError::invalid_payload("headers must be an object")),
        };
        Ok(WebhookRequest {
            url: url.to_string(),
            method: payload_str(payload, "method")
                .unwrap_or("POST")
                .to_ascii_uppercase(),
            headers,
            body: payload.get("body").cloned(),
        })
    }

    async fn record(&self, log: WebhookLog) {
        if let Err(e) = self.logs.record(log).await {
            warn!(error = %e, "failed to write webhook log");
        }
    }
}

#[async_trait]
impl JobHandler for SendWebhookHandler {
    async fn handle(&self, job: &Job) -> Result<JsonValue, JobError> {
        let request = Self::request(job)?;

        let response = match self.client.send(&request).await {
            Ok(response) => response,
            Err(e) => {
                self.record(WebhookLog::unreachable(job.tenant_id, &request, &e, Utc::now()))
                    .await;
                return Err(JobError::Webhook {
                    status_code: None,
                    message: e.to_string(),
                });
            }
        };
        self.record(WebhookLog::answered(job.tenant_id, &request, &response, Utc::now()))
            .await;

        if !response.is_success() {
            return Err(JobError::Webhook {
                status_code: Some(response.status_code),
                message: format!("Webhook failed with status {}", response.status_code),
            });
        }

        info!(job_id = %job.id, url = %request.url, status_code = response.status_code, "webhook delivered");
        Ok(json!({
            "url": request.url,
            "statusCode": response.status_code,
            "sentAt": Utc::now(),
        }))
    }
}
