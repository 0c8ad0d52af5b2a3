//! Postgres-backed invoice records (`invoices` table).
//!
//! The full record is kept as JSONB; the columns used for filtering
//! (`tenant_id`, `status`, `due_date`) are duplicated next to it.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use oryxa_core::{InvoiceId, TenantId};
use oryxa_invoicing::{Invoice, InvoiceStatus, invoice_number};

use super::invoices::{InvoiceStore, InvoiceStoreError};

#[derive(Debug, Clone)]
pub struct PostgresInvoiceStore {
    pool: Arc<PgPool>,
}

impl PostgresInvoiceStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    async fn update<F>(
        &self,
        tenant_id: TenantId,
        id: InvoiceId,
        apply: F,
    ) -> Result<Invoice, InvoiceStoreError>
    where
        F: FnOnce(&mut Invoice) + Send,
    {
        let mut tx = self.pool.begin().await.map_err(storage("begin_transaction"))?;

        let row = sqlx::query(
            "SELECT data FROM invoices WHERE id = $1 AND tenant_id = $2 FOR UPDATE",
        )
        .bind(id.as_uuid())
        .bind(tenant_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage("lock_invoice"))?
        .ok_or(InvoiceStoreError::NotFound(id))?;

        let mut invoice = invoice_from_row(&row)?;
        apply(&mut invoice);

        sqlx::query(
            "UPDATE invoices SET status = $2, due_date = $3, data = $4, updated_at = NOW() WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(invoice.status.as_str())
        .bind(invoice.due_date)
        .bind(to_json(&invoice)?)
        .execute(&mut *tx)
        .await
        .map_err(storage("update_invoice"))?;

        tx.commit().await.map_err(storage("commit"))?;
        Ok(invoice)
    }
}

#[async_trait]
impl InvoiceStore for PostgresInvoiceStore {
    #[instrument(skip(self, invoice), fields(invoice_id = %invoice.id), err)]
    async fn insert(&self, invoice: Invoice) -> Result<(), InvoiceStoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO invoices (id, tenant_id, number, status, due_date, data, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            "#,
        )
        .bind(invoice.id.as_uuid())
        .bind(invoice.tenant_id.as_uuid())
        .bind(&invoice.number)
        .bind(invoice.status.as_str())
        .bind(invoice.due_date)
        .bind(to_json(&invoice)?)
        .execute(&*self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("23505") => {
                Err(InvoiceStoreError::AlreadyExists(invoice.id))
            }
            Err(e) => Err(storage("insert_invoice")(e)),
        }
    }

    #[instrument(skip(self), fields(invoice_id = %id), err)]
    async fn get(&self, tenant_id: TenantId, id: InvoiceId) -> Result<Invoice, InvoiceStoreError> {
        let row = sqlx::query("SELECT data FROM invoices WHERE id = $1 AND tenant_id = $2")
            .bind(id.as_uuid())
            .bind(tenant_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(storage("get_invoice"))?
            .ok_or(InvoiceStoreError::NotFound(id))?;
        invoice_from_row(&row)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn next_number(&self, tenant_id: TenantId, year: i32) -> Result<String, InvoiceStoreError> {
        let prefix = format!("INV-{year}-");
        let row = sqlx::query(
            r#"
            SELECT COALESCE(MAX(CAST(substr(number, length($2) + 1) AS BIGINT)), 0) AS last
            FROM invoices
            WHERE tenant_id = $1
              AND number LIKE $2 || '%'
              AND substr(number, length($2) + 1) ~ '^[0-9]{1,9}$'
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(&prefix)
        .fetch_one(&*self.pool)
        .await
        .map_err(storage("next_number"))?;

        let last: i64 = row.try_get("last").map_err(storage("decode_row"))?;
        let last = u32::try_from(last)
            .map_err(|_| InvoiceStoreError::Storage(format!("invoice sequence out of range: {last}")))?;
        Ok(invoice_number(year, last + 1))
    }

    #[instrument(skip(self, url), fields(invoice_id = %id), err)]
    async fn attach_pdf(
        &self,
        tenant_id: TenantId,
        id: InvoiceId,
        url: &str,
        at: DateTime<Utc>,
    ) -> Result<Invoice, InvoiceStoreError> {
        let url = url.to_string();
        self.update(tenant_id, id, move |inv| inv.attach_pdf(url, at))
            .await
    }

    #[instrument(skip(self), fields(invoice_id = %id, status = %status), err)]
    async fn set_status(
        &self,
        tenant_id: TenantId,
        id: InvoiceId,
        status: InvoiceStatus,
        at: DateTime<Utc>,
    ) -> Result<Invoice, InvoiceStoreError> {
        self.update(tenant_id, id, move |inv| inv.set_status(status, at))
            .await
    }

    #[instrument(skip(self), err)]
    async fn list_overdue(&self, now: DateTime<Utc>) -> Result<Vec<Invoice>, InvoiceStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT data FROM invoices
            WHERE status NOT IN ('paid', 'cancelled') AND due_date < $1
            ORDER BY due_date ASC
            "#,
        )
        .bind(now)
        .fetch_all(&*self.pool)
        .await
        .map_err(storage("list_overdue"))?;

        rows.iter().map(invoice_from_row).collect()
    }
}

fn invoice_from_row(row: &PgRow) -> Result<Invoice, InvoiceStoreError> {
    let data: JsonValue = row.try_get("data").map_err(storage("decode_row"))?;
    serde_json::from_value(data)
        .map_err(|e| InvoiceStoreError::Storage(format!("invalid invoice record: {e}")))
}

fn to_json(invoice: &Invoice) -> Result<JsonValue, InvoiceStoreError> {
    serde_json::to_value(invoice)
        .map_err(|e| InvoiceStoreError::Storage(format!("serialize invoice: {e}")))
}

fn storage(operation: &'static str) -> impl Fn(sqlx::Error) -> InvoiceStoreError {
    move |e| InvoiceStoreError::Storage(format!("sqlx error in {operation}: {e}"))
}
