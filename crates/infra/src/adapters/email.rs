//! Transactional email delivery.
//!
//! [`SendGridSender`] posts to the SendGrid v3 mail API.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::json;

use super::{AdapterError, DeliveryReceipt, ensure_success, http_client};

const SENDGRID_ENDPOINT: &str = "https://api.sendgrid.com/v3/mail/send";

/// A rendered HTML email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Delivers a rendered email or fails.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<DeliveryReceipt, AdapterError>;
}

#[derive(Debug, Clone)]
pub struct SendGridConfig {
    pub api_key: String,
    /// Verified sender address.
    pub sender: String,
}

pub struct SendGridSender {
    client: reqwest::Client,
    config: SendGridConfig,
    endpoint: String,
}

impl SendGridSender {
    pub fn new(config: SendGridConfig) -> Result<Self, AdapterError> {
        Ok(Self {
            client: http_client()?,
            config,
            endpoint: SENDGRID_ENDPOINT.to_string(),
        })
    }

    /// Point the sender at another endpoint (sandbox, local stub).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl EmailSender for SendGridSender {
    async fn send(&self, message: &EmailMessage) -> Result<DeliveryReceipt, AdapterError> {
        let body = json!({
            "personalizations": [{ "to": [{ "email": message.to }] }],
            "from": { "email": self.config.sender },
            "subject": message.subject,
            "content": [{ "type": "text/html", "value": message.html }],
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;
        let response = ensure_success(response).await?;

        let message_id = response
            .headers()
            .get("x-message-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        tracing::info!(to = %message.to, message_id = %message_id, "email sent");
        Ok(DeliveryReceipt { message_id })
    }
}

/// Keeps every message in memory instead of sending it.
///
/// Used when `DELIVERY_MODE=log` and as the test double.
#[derive(Default)]
pub struct RecordingEmailSender {
    sent: Mutex<Vec<EmailMessage>>,
    failure: Mutex<Option<String>>,
}

impl RecordingEmailSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every send with `message` until cleared.
    pub fn fail_with(&self, message: Option<&str>) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = message.map(str::to_string);
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl EmailSender for RecordingEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<DeliveryReceipt, AdapterError> {
        if let Some(reason) = self
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Err(AdapterError::Simulated(reason));
        }
        let mut sent = self.sent.lock().unwrap_or_else(PoisonError::into_inner);
        sent.push(message.clone());
        let message_id = format!("log_email_{}", sent.len());
        tracing::info!(to = %message.to, subject = %message.subject, %message_id, "email recorded");
        Ok(DeliveryReceipt { message_id })
    }
}
