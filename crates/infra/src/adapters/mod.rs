//! Outbound collaborators used by job handlers: notification senders, document
//! rendering, object storage and webhook delivery.
//!
//! Every adapter has a live implementation (HTTP provider, filesystem) and a
//! recording one used in `log` delivery mode and in tests.

use std::time::Duration;

pub mod email;
pub mod pdf;
pub mod storage;
pub mod webhook;
pub mod whatsapp;

pub use email::{EmailMessage, EmailSender, RecordingEmailSender, SendGridConfig, SendGridSender};
pub use pdf::{DocumentRenderer, PdfRenderer};
pub use storage::{FsObjectStorage, MemoryObjectStorage, ObjectStorage};
pub use webhook::{
    HttpWebhookClient, InMemoryWebhookLogSink, PostgresWebhookLogSink, RecordingWebhookClient,
    WebhookClient, WebhookLog, WebhookLogSink, WebhookRequest, WebhookResponse,
};
pub use whatsapp::{
    MetaWhatsAppSender, RecordingWhatsAppSender, TwilioWhatsAppSender, WhatsAppMessage,
    WhatsAppSender,
};

/// HTTP request timeout for a single provider call.
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Error type for adapter failures.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// Provider credentials are missing.
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The provider answered with a non-2xx status.
    #[error("provider returned HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("render failed: {0}")]
    Render(String),

    #[error("storage error: {0}")]
    Storage(String),

    /// Recording adapter told to fail.
    #[error("{0}")]
    Simulated(String),
}

/// Provider acknowledgement of an accepted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub message_id: String,
}

pub(crate) fn http_client() -> Result<reqwest::Client, AdapterError> {
    Ok(reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?)
}

/// Turn a non-2xx response into [`AdapterError::Rejected`].
pub(crate) async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, AdapterError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(AdapterError::Rejected {
        status: status.as_u16(),
        body,
    })
}
