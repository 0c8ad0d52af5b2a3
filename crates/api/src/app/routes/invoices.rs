use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{Path, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{Datelike, Utc};
use serde_json::json;

use oryxa_core::InvoiceId;
use oryxa_infra::automations::AutomationEvent;
use oryxa_infra::jobs::{JobType, NewJob, Priority};
use oryxa_invoicing::{InvoiceDraft, InvoiceStatus};

use crate::app::AppState;
use crate::app::dto::{self, InvoiceCreated, JobAccepted, SendInvoiceRequest, SendMethod};
use crate::app::errors::{ApiError, ApiResult, json_error};
use crate::context::TenantContext;

/// Raised after an invoice was stored.
pub const INVOICE_CREATED_TRIGGER: &str = "invoice_created";

/// Raised after an invoice was queued for delivery.
pub const INVOICE_SENT_TRIGGER: &str = "invoice_sent";

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_invoice))
        .route("/:id", get(get_invoice))
        .route("/:id/generate-pdf", post(generate_pdf))
        .route("/:id/send", post(send_invoice))
}

fn parse_id(id: &str) -> ApiResult<InvoiceId> {
    id.parse()
        .map_err(|_| ApiError::Validation("invalid invoice id".into()))
}

/// Store a new draft invoice, queue its PDF at high priority and raise
/// `invoice_created`.
pub async fn create_invoice(
    Extension(state): Extension<Arc<AppState>>,
    Extension(tenant): Extension<TenantContext>,
    payload: Result<Json<InvoiceDraft>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let tenant_id = tenant.tenant_id();
    let draft = dto::body(payload)?;
    let now = Utc::now();
    draft.validate(now)?;

    let number = state.invoices.next_number(tenant_id, now.year()).await?;
    let invoice = draft.into_invoice(tenant_id, number, now)?;
    state.invoices.insert(invoice.clone()).await?;

    let job_id = state
        .queue
        .enqueue(
            NewJob::new(
                tenant_id,
                JobType::PdfGeneration,
                json!({ "invoiceId": invoice.id.to_string() }),
            )
            .with_priority(Priority::High),
        )
        .await?;

    if let Some(events) = &state.events {
        events
            .publish(AutomationEvent::new(
                tenant_id,
                INVOICE_CREATED_TRIGGER,
                invoice.event_data(now),
            ))
            .await;
    }

    Ok((
        StatusCode::CREATED,
        Json(InvoiceCreated {
            invoice,
            job_id,
            message: "Invoice created successfully. PDF generation queued.",
        }),
    ))
}

pub async fn get_invoice(
    Extension(state): Extension<Arc<AppState>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let invoice = state.invoices.get(tenant.tenant_id(), parse_id(&id)?).await?;
    Ok(Json(invoice))
}

/// Queue PDF rendering at high priority; the worker stores the file and
/// records its URL on the invoice.
pub async fn generate_pdf(
    Extension(state): Extension<Arc<AppState>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let invoice = state.invoices.get(tenant.tenant_id(), parse_id(&id)?).await?;

    let job_id = state
        .queue
        .enqueue(
            NewJob::new(
                tenant.tenant_id(),
                JobType::PdfGeneration,
                json!({ "invoiceId": invoice.id.to_string() }),
            )
            .with_priority(Priority::High),
        )
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(JobAccepted::new(job_id).with_message("PDF generation queued")),
    ))
}

pub async fn send_invoice(
    Extension(state): Extension<Arc<AppState>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    payload: Result<Json<SendInvoiceRequest>, JsonRejection>,
) -> ApiResult<axum::response::Response> {
    let tenant_id = tenant.tenant_id();
    let invoice_id = parse_id(&id)?;
    let req = dto::body(payload)?;
    let recipient = req.recipient.trim();
    if recipient.is_empty() {
        return Err(ApiError::Validation("Recipient is required".into()));
    }

    let invoice = state.invoices.get(tenant_id, invoice_id).await?;
    let Some(pdf_url) = invoice.pdf_url.clone() else {
        return Ok(json_error(
            StatusCode::BAD_REQUEST,
            "pdf_missing",
            "PDF not generated yet. Please wait or regenerate.",
        ));
    };

    let (job_type, payload) = match req.method {
        SendMethod::Email => (
            JobType::SendEmail,
            json!({
                "invoiceId": invoice.id.to_string(),
                "pdfUrl": pdf_url,
                "to": recipient,
            }),
        ),
        SendMethod::Whatsapp => (
            JobType::SendWhatsapp,
            json!({
                "invoiceId": invoice.id.to_string(),
                "pdfUrl": pdf_url,
                "to": recipient,
                "message": req
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("Your invoice {} is ready.", invoice.number)),
            }),
        ),
    };

    let job_id = state
        .queue
        .enqueue(NewJob::new(tenant_id, job_type, payload).with_priority(Priority::High))
        .await?;

    let now = Utc::now();
    let sent = state
        .invoices
        .set_status(tenant_id, invoice_id, InvoiceStatus::Sent, now)
        .await?;

    if let Some(events) = &state.events {
        events
            .publish(AutomationEvent::new(
                tenant_id,
                INVOICE_SENT_TRIGGER,
                sent.event_data(now),
            ))
            .await;
    }

    Ok(Json(
        JobAccepted::new(job_id)
            .with_message(format!("Invoice queued for sending via {}", req.method.as_str())),
    )
    .into_response())
}
