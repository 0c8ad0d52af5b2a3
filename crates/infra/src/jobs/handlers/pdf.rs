use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value as JsonValue, json};
use tracing::info;

use crate::adapters::{DocumentRenderer, ObjectStorage};
use crate::jobs::error::JobError;
use crate::jobs::types::Job;
use crate::records::InvoiceStore;

use super::{JobHandler, payload_invoice_id};

/// `pdf_generation`: render, store, and link the invoice document.
pub struct PdfGenerationHandler {
    invoices: Arc<dyn InvoiceStore>,
    renderer: Arc<dyn DocumentRenderer>,
    storage: Arc<dyn ObjectStorage>,
}

impl PdfGenerationHandler {
    pub fn new(
        invoices: Arc<dyn InvoiceStore>,
        renderer: Arc<dyn DocumentRenderer>,
        storage: Arc<dyn ObjectStorage>,
    ) -> Self {
        Self {
            invoices,
            renderer,
            storage,
        }
    }
}

#[async_trait]
impl JobHandler for PdfGenerationHandler {
    async fn handle(&self, job: &Job) -> Result<JsonValue, JobError> {
        let invoice_id = payload_invoice_id(&job.payload)?
            .ok_or_else(|| JobError::invalid_payload("missing invoiceId"))?;

        let invoice = self.invoices.get(job.tenant_id, invoice_id).await?;
        let bytes = self.renderer.render(&invoice)?;
        let url = self
            .storage
            .put(&invoice.document_key(), bytes, self.renderer.content_type())
            .await?;

        let generated_at = Utc::now();
        self.invoices
            .attach_pdf(job.tenant_id, invoice_id, &url, generated_at)
            .await?;

        info!(job_id = %job.id, invoice_id = %invoice_id, pdf_url = %url, "invoice pdf generated");
        Ok(json!({
            "invoiceId": invoice_id.to_string(),
            "pdfUrl": url,
            "generatedAt": generated_at,
        }))
    }
}
