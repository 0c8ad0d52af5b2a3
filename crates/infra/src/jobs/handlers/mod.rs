//! Job handlers, one per job type, and the registry the worker dispatches
//! through.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use oryxa_core::{InvoiceId, parse_optional_id};

use crate::adapters::{
    DocumentRenderer, EmailSender, ObjectStorage, WebhookClient, WebhookLogSink, WhatsAppSender,
};
use crate::records::InvoiceStore;

use super::error::JobError;
use super::types::{Job, JobType};

mod email;
mod pdf;
mod webhook;
mod whatsapp;

pub use email::SendEmailHandler;
pub use pdf::PdfGenerationHandler;
pub use webhook::SendWebhookHandler;
pub use whatsapp::SendWhatsAppHandler;

/// Executes one job type. The returned JSON becomes the job's `result`.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<JsonValue, JobError>;
}

/// Collaborators the built-in handlers need.
#[derive(Clone)]
pub struct HandlerDeps {
    pub invoices: Arc<dyn InvoiceStore>,
    pub renderer: Arc<dyn DocumentRenderer>,
    pub storage: Arc<dyn ObjectStorage>,
    pub email: Arc<dyn EmailSender>,
    pub whatsapp: Arc<dyn WhatsAppSender>,
    pub webhooks: Arc<dyn WebhookClient>,
    pub webhook_logs: Arc<dyn WebhookLogSink>,
}

/// Handlers keyed by job type.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a handler for each built-in job type.
    pub fn standard(deps: HandlerDeps) -> Self {
        Self::new()
            .with(
                JobType::PdfGeneration,
                PdfGenerationHandler::new(deps.invoices.clone(), deps.renderer, deps.storage),
            )
            .with(
                JobType::SendEmail,
                SendEmailHandler::new(deps.invoices.clone(), deps.email),
            )
            .with(
                JobType::SendWhatsapp,
                SendWhatsAppHandler::new(deps.invoices, deps.whatsapp),
            )
            .with(
                JobType::SendWebhook,
                SendWebhookHandler::new(deps.webhooks, deps.webhook_logs),
            )
    }

    pub fn with(mut self, job_type: JobType, handler: impl JobHandler + 'static) -> Self {
        self.register(job_type, Arc::new(handler));
        self
    }

    pub fn register(&mut self, job_type: JobType, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(job_type, handler);
    }

    pub fn get(&self, job_type: &JobType) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Non-empty string field of the payload.
pub(crate) fn payload_str<'a>(payload: &'a JsonValue, key: &str) -> Option<&'a str> {
    payload
        .get(key)
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// `payload.invoiceId`, if present.
pub(crate) fn payload_invoice_id(payload: &JsonValue) -> Result<Option<InvoiceId>, JobError> {
    parse_optional_id(payload.get("invoiceId"))
        .map_err(|e| JobError::invalid_payload(format!("invoiceId: {e}")))
}
