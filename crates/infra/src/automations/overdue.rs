//! Periodic scan raising `invoice_overdue` events.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use oryxa_invoicing::InvoiceStatus;

use crate::records::{InvoiceStore, InvoiceStoreError};

use super::events::{AutomationEvent, AutomationEventSender};

pub const OVERDUE_TRIGGER: &str = "invoice_overdue";

/// Emit one event per unsettled invoice past its due date, marking
/// still-open invoices `overdue`. Returns the number of events published.
pub async fn scan_overdue(
    invoices: &dyn InvoiceStore,
    events: &AutomationEventSender,
    now: DateTime<Utc>,
) -> Result<usize, InvoiceStoreError> {
    let overdue = invoices.list_overdue(now).await?;
    let mut published = 0;

    for invoice in overdue {
        if invoice.status != InvoiceStatus::Overdue {
            if let Err(e) = invoices
                .set_status(invoice.tenant_id, invoice.id, InvoiceStatus::Overdue, now)
                .await
            {
                warn!(invoice_id = %invoice.id, error = %e, "failed to mark invoice overdue");
            }
        }

        let event = AutomationEvent::new(invoice.tenant_id, OVERDUE_TRIGGER, invoice.event_data(now));
        if !events.publish(event).await {
            break;
        }
        published += 1;
    }
    Ok(published)
}

pub fn spawn_overdue_scan(
    invoices: Arc<dyn InvoiceStore>,
    events: AutomationEventSender,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "overdue invoice scan started");
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("overdue invoice scan stopped");
                    break;
                }
                _ = ticker.tick() => {
                    match scan_overdue(invoices.as_ref(), &events, Utc::now()).await {
                        Ok(0) => {}
                        Ok(n) => info!(events = n, "overdue invoices reported"),
                        Err(e) => error!(error = %e, "overdue invoice scan failed"),
                    }
                }
            }
        }
    })
}
