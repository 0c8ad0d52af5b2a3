use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use oryxa_core::{InvoiceId, TenantId};
use oryxa_invoicing::{Invoice, InvoiceStatus, invoice_number, number_sequence};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvoiceStoreError {
    #[error("invoice not found: {0}")]
    NotFound(InvoiceId),

    #[error("invoice already exists: {0}")]
    AlreadyExists(InvoiceId),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Tenant-scoped invoice records.
///
/// Lookups for another tenant's invoice report `NotFound`.
#[async_trait]
pub trait InvoiceStore: Send + Sync {
    async fn insert(&self, invoice: Invoice) -> Result<(), InvoiceStoreError>;

    async fn get(&self, tenant_id: TenantId, id: InvoiceId) -> Result<Invoice, InvoiceStoreError>;

    /// Next `INV-<year>-NNNN` number for the tenant. Two concurrent callers
    /// may get the same number; the second insert then reports
    /// `AlreadyExists`.
    async fn next_number(&self, tenant_id: TenantId, year: i32) -> Result<String, InvoiceStoreError>;

    /// Record the stored PDF location and generation time.
    async fn attach_pdf(
        &self,
        tenant_id: TenantId,
        id: InvoiceId,
        url: &str,
        at: DateTime<Utc>,
    ) -> Result<Invoice, InvoiceStoreError>;

    async fn set_status(
        &self,
        tenant_id: TenantId,
        id: InvoiceId,
        status: InvoiceStatus,
        at: DateTime<Utc>,
    ) -> Result<Invoice, InvoiceStoreError>;

    /// Unsettled invoices past their due date, across tenants.
    async fn list_overdue(&self, now: DateTime<Utc>) -> Result<Vec<Invoice>, InvoiceStoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryInvoiceStore {
    invoices: RwLock<HashMap<InvoiceId, Invoice>>,
}

impl InMemoryInvoiceStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn update<F>(
        &self,
        tenant_id: TenantId,
        id: InvoiceId,
        apply: F,
    ) -> Result<Invoice, InvoiceStoreError>
    where
        F: FnOnce(&mut Invoice),
    {
        let mut invoices = self.invoices.write().unwrap_or_else(PoisonError::into_inner);
        let invoice = invoices
            .get_mut(&id)
            .filter(|inv| inv.tenant_id == tenant_id)
            .ok_or(InvoiceStoreError::NotFound(id))?;
        apply(invoice);
        Ok(invoice.clone())
    }
}

#[async_trait]
impl InvoiceStore for InMemoryInvoiceStore {
    async fn insert(&self, invoice: Invoice) -> Result<(), InvoiceStoreError> {
        let mut invoices = self.invoices.write().unwrap_or_else(PoisonError::into_inner);
        let taken = invoices.values().any(|inv| {
            inv.id == invoice.id
                || (inv.tenant_id == invoice.tenant_id && inv.number == invoice.number)
        });
        if taken {
            return Err(InvoiceStoreError::AlreadyExists(invoice.id));
        }
        invoices.insert(invoice.id, invoice);
        Ok(())
    }

    async fn get(&self, tenant_id: TenantId, id: InvoiceId) -> Result<Invoice, InvoiceStoreError> {
        self.invoices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .filter(|inv| inv.tenant_id == tenant_id)
            .cloned()
            .ok_or(InvoiceStoreError::NotFound(id))
    }

    async fn next_number(&self, tenant_id: TenantId, year: i32) -> Result<String, InvoiceStoreError> {
        let last = self
            .invoices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|inv| inv.tenant_id == tenant_id)
            .filter_map(|inv| number_sequence(&inv.number, year))
            .max()
            .unwrap_or(0);
        Ok(invoice_number(year, last + 1))
    }

    async fn attach_pdf(
        &self,
        tenant_id: TenantId,
        id: InvoiceId,
        url: &str,
        at: DateTime<Utc>,
    ) -> Result<Invoice, InvoiceStoreError> {
        self.update(tenant_id, id, |inv| inv.attach_pdf(url, at))
    }

    async fn set_status(
        &self,
        tenant_id: TenantId,
        id: InvoiceId,
        status: InvoiceStatus,
        at: DateTime<Utc>,
    ) -> Result<Invoice, InvoiceStoreError> {
        self.update(tenant_id, id, |inv| inv.set_status(status, at))
    }

    async fn list_overdue(&self, now: DateTime<Utc>) -> Result<Vec<Invoice>, InvoiceStoreError> {
        let mut overdue: Vec<Invoice> = self
            .invoices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|inv| inv.is_overdue(now))
            .cloned()
            .collect();
        overdue.sort_by_key(|inv| inv.due_date);
        Ok(overdue)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use oryxa_invoicing::{ClientContact, Issuer, LineItem};

    pub(crate) fn invoice_for(tenant_id: TenantId) -> Invoice {
        let issued = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        Invoice {
            id: InvoiceId::new(),
            tenant_id,
            number: "INV-2024-0042".into(),
            status: InvoiceStatus::Draft,
            currency: "USD".into(),
            issuer: Issuer {
                name: "Acme Studio".into(),
                ..Issuer::default()
            },
            client: ClientContact {
                name: "Jane Doe".into(),
                email: Some("jane@client.test".into()),
                phone: Some("+1 555 0100".into()),
            },
            issue_date: issued,
            due_date: issued + Duration::days(14),
            items: vec![LineItem::new("Consulting", 2, 25_000)],
            notes: None,
            pdf_url: None,
            pdf_generated_at: None,
            sent_at: None,
            paid_at: None,
        }
    }

    #[tokio::test]
    async fn other_tenants_cannot_see_invoice() {
        let store = InMemoryInvoiceStore::new();
        let owner = TenantId::new();
        let invoice = invoice_for(owner);
        let id = invoice.id;
        store.insert(invoice).await.unwrap();

        assert!(store.get(owner, id).await.is_ok());
        assert_eq!(
            store.get(TenantId::new(), id).await,
            Err(InvoiceStoreError::NotFound(id))
        );
        assert!(
            store
                .set_status(TenantId::new(), id, InvoiceStatus::Paid, Utc::now())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let store = InMemoryInvoiceStore::new();
        let invoice = invoice_for(TenantId::new());
        store.insert(invoice.clone()).await.unwrap();

        assert_eq!(
            store.insert(invoice.clone()).await,
            Err(InvoiceStoreError::AlreadyExists(invoice.id))
        );
    }

    #[tokio::test]
    async fn numbers_continue_per_tenant_and_year() {
        let store = InMemoryInvoiceStore::new();
        let tenant = TenantId::new();
        assert_eq!(store.next_number(tenant, 2024).await.unwrap(), "INV-2024-0001");

        store.insert(invoice_for(tenant)).await.unwrap();
        assert_eq!(store.next_number(tenant, 2024).await.unwrap(), "INV-2024-0043");
        assert_eq!(store.next_number(tenant, 2025).await.unwrap(), "INV-2025-0001");
        assert_eq!(store.next_number(TenantId::new(), 2024).await.unwrap(), "INV-2024-0001");

        // Same number, new id: taken within the tenant.
        let clash = invoice_for(tenant);
        assert_eq!(
            store.insert(clash.clone()).await,
            Err(InvoiceStoreError::AlreadyExists(clash.id))
        );
    }

    #[tokio::test]
    async fn attach_pdf_and_status_updates_persist() {
        let store = InMemoryInvoiceStore::new();
        let tenant = TenantId::new();
        let invoice = invoice_for(tenant);
        let id = invoice.id;
        store.insert(invoice).await.unwrap();
        let now = Utc::now();

        store.attach_pdf(tenant, id, "memory://x.pdf", now).await.unwrap();
        let sent = store.set_status(tenant, id, InvoiceStatus::Sent, now).await.unwrap();

        assert_eq!(sent.pdf_url.as_deref(), Some("memory://x.pdf"));
        assert_eq!(sent.pdf_generated_at, Some(now));
        assert_eq!(sent.sent_at, Some(now));
    }

    #[tokio::test]
    async fn overdue_listing_skips_settled_and_future() {
        let store = InMemoryInvoiceStore::new();
        let tenant = TenantId::new();

        let late = invoice_for(tenant);
        let mut paid = invoice_for(tenant);
        paid.number = "INV-2024-0043".into();
        paid.status = InvoiceStatus::Paid;
        let mut future = invoice_for(tenant);
        future.number = "INV-2024-0044".into();
        future.due_date = Utc::now() + Duration::days(30);
        let late_id = late.id;

        for inv in [late, paid, future] {
            store.insert(inv).await.unwrap();
        }

        let overdue = store.list_overdue(Utc::now()).await.unwrap();
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].id, late_id);
    }
}
