use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value as JsonValue, json};
use tracing::info;

use oryxa_invoicing::invoice_email;

use crate::adapters::{EmailMessage, EmailSender};
use crate::jobs::error::JobError;
use crate::jobs::types::Job;
use crate::records::InvoiceStore;

use super::{JobHandler, payload_invoice_id, payload_str};

/// `send_email`.
///
/// With `invoiceId` the invoice email is sent to `to` or the client's
/// address; otherwise `to`, `subject` and `html` come from the payload.
pub struct SendEmailHandler {
    invoices: Arc<dyn InvoiceStore>,
    sender: Arc<dyn EmailSender>,
}

impl SendEmailHandler {
    pub fn new(invoices: Arc<dyn InvoiceStore>, sender: Arc<dyn EmailSender>) -> Self {
        Self { invoices, sender }
    }

    async fn build_message(&self, job: &Job) -> Result<EmailMessage, JobError> {
        let payload = &job.payload;
        let to = payload_str(payload, "to").map(str::to_string);

        if let Some(invoice_id) = payload_invoice_id(payload)? {
            let invoice = self.invoices.get(job.tenant_id, invoice_id).await?;
            let to = to
                .or_else(|| invoice.client.email.clone())
                .ok_or_else(|| JobError::invalid_payload("missing recipient email"))?;
            let content = invoice_email(&invoice, invoice.pdf_url.as_deref());
            return Ok(EmailMessage {
                to,
                subject: content.subject,
                html: content.html,
            });
        }

        let to = to.ok_or_else(|| JobError::invalid_payload("missing recipient email"))?;
        let subject = payload_str(payload, "subject")
            .ok_or_else(|| JobError::invalid_payload("missing subject"))?;
        let html = payload
            .get("html")
            .or_else(|| payload.get("body"))
            .and_then(JsonValue::as_str)
            .unwrap_or_default();
        Ok(EmailMessage {
            to,
            subject: subject.to_string(),
            html: html.to_string(),
        })
    }
}

#[async_trait]
impl JobHandler for SendEmailHandler {
    async fn handle(&self, job: &Job) -> Result<JsonValue, JobError> {
        let message = self.build_message(job).await?;
        let receipt = self.sender.send(&message).await?;

        info!(job_id = %job.id, to = %message.to, message_id = %receipt.message_id, "email delivered");
        Ok(json!({
            "to": message.to,
            "messageId": receipt.message_id,
            "sentAt": Utc::now(),
        }))
    }
}
