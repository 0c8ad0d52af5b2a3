use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value as JsonValue, json};
use tracing::info;

use oryxa_invoicing::invoice_whatsapp_message;

use crate::adapters::{WhatsAppMessage, WhatsAppSender};
use crate::jobs::error::JobError;
use crate::jobs::types::Job;
use crate::records::InvoiceStore;

use super::{JobHandler, payload_invoice_id, payload_str};

/// `send_whatsapp`.
///
/// With `invoiceId` the invoice message goes to `to` or the client's phone
/// with the PDF attached; a payload `message` replaces the default text.
pub struct SendWhatsAppHandler {
    invoices: Arc<dyn InvoiceStore>,
    sender: Arc<dyn WhatsAppSender>,
}

impl SendWhatsAppHandler {
    pub fn new(invoices: Arc<dyn InvoiceStore>, sender: Arc<dyn WhatsAppSender>) -> Self {
        Self { invoices, sender }
    }

    async fn build_message(&self, job: &Job) -> Result<WhatsAppMessage, JobError> {
        let payload = &job.payload;
        let to = payload_str(payload, "to").map(str::to_string);
        let custom = payload_str(payload, "message").map(str::to_string);

        if let Some(invoice_id) = payload_invoice_id(payload)? {
            let invoice = self.invoices.get(job.tenant_id, invoice_id).await?;
            let to = to
                .or_else(|| invoice.client.phone.clone())
                .ok_or_else(|| JobError::invalid_payload("missing recipient phone"))?;
            let body = custom.unwrap_or_else(|| {
                invoice_whatsapp_message(&invoice, invoice.pdf_url.as_deref())
            });
            return Ok(WhatsAppMessage {
                to,
                body,
                media_url: invoice.pdf_url.clone(),
            });
        }

        Ok(WhatsAppMessage {
            to: to.ok_or_else(|| JobError::invalid_payload("missing recipient phone"))?,
            body: custom.ok_or_else(|| JobError::invalid_payload("missing message"))?,
            media_url: payload_str(payload, "mediaUrl").map(str::to_string),
        })
    }
}

#[async_trait]
impl JobHandler for SendWhatsAppHandler {
    async fn handle(&self, job: &Job) -> Result<JsonValue, JobError> {
        let message = self.build_message(job).await?;
        let receipt = self.sender.send(&message).await?;

        info!(job_id = %job.id, to = %message.to, message_id = %receipt.message_id, "whatsapp delivered");
        Ok(json!({
            "to": message.to,
            "messageId": receipt.message_id,
            "sentAt": Utc::now(),
        }))
    }
}
