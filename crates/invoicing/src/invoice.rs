use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue, json};

use oryxa_core::{DomainError, InvoiceId, TenantId};

/// Invoice status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Overdue,
    Paid,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::Overdue => "overdue",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    /// Paid and cancelled invoices are settled and never become overdue.
    pub fn is_settled(&self) -> bool {
        matches!(self, InvoiceStatus::Paid | InvoiceStatus::Cancelled)
    }
}

impl core::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvoiceStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(InvoiceStatus::Draft),
            "sent" => Ok(InvoiceStatus::Sent),
            "overdue" => Ok(InvoiceStatus::Overdue),
            "paid" => Ok(InvoiceStatus::Paid),
            "cancelled" | "canceled" => Ok(InvoiceStatus::Cancelled),
            other => Err(DomainError::validation(format!(
                "unknown invoice status: {other}"
            ))),
        }
    }
}

/// Billed party contact details.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClientContact {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Issuing company (the tenant's billing profile).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Issuer {
    pub name: String,
    pub address: Option<String>,
    pub email: Option<String>,
    pub tax_id: Option<String>,
}

/// Invoice line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    pub quantity: u32,
    /// Price in smallest currency unit (e.g., cents).
    pub unit_price: u64,
    /// Discount in percent of the line subtotal.
    #[serde(default)]
    pub discount_percent: f64,
    /// Tax in percent of the discounted line amount.
    #[serde(default)]
    pub tax_rate_percent: f64,
}

impl LineItem {
    pub fn new(description: impl Into<String>, quantity: u32, unit_price: u64) -> Self {
        Self {
            description: description.into(),
            quantity,
            unit_price,
            discount_percent: 0.0,
            tax_rate_percent: 0.0,
        }
    }

    pub fn with_discount(mut self, percent: f64) -> Self {
        self.discount_percent = percent;
        self
    }

    pub fn with_tax_rate(mut self, percent: f64) -> Self {
        self.tax_rate_percent = percent;
        self
    }

    pub fn subtotal(&self) -> u64 {
        u64::from(self.quantity) * self.unit_price
    }

    pub fn discount(&self) -> u64 {
        percent_of(self.subtotal(), self.discount_percent)
    }

    pub fn tax(&self) -> u64 {
        percent_of(self.subtotal().saturating_sub(self.discount()), self.tax_rate_percent)
    }

    /// Line amount after discount and tax.
    pub fn amount(&self) -> u64 {
        self.subtotal().saturating_sub(self.discount()) + self.tax()
    }
}

fn percent_of(amount: u64, percent: f64) -> u64 {
    if percent <= 0.0 {
        return 0;
    }
    ((amount as f64) * percent / 100.0).round() as u64
}

/// Totals in smallest currency unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InvoiceTotals {
    pub subtotal: u64,
    pub discount_total: u64,
    pub tax_total: u64,
    pub total: u64,
}

impl InvoiceTotals {
    pub fn from_items(items: &[LineItem]) -> Self {
        items.iter().fold(Self::default(), |acc, item| Self {
            subtotal: acc.subtotal + item.subtotal(),
            discount_total: acc.discount_total + item.discount(),
            tax_total: acc.tax_total + item.tax(),
            total: acc.total + item.amount(),
        })
    }
}

/// Invoice record with its line items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub tenant_id: TenantId,
    /// Human-facing number, e.g. `INV-2024-0001`.
    pub number: String,
    pub status: InvoiceStatus,
    /// ISO 4217 code.
    pub currency: String,
    pub issuer: Issuer,
    pub client: ClientContact,
    pub issue_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub items: Vec<LineItem>,
    pub notes: Option<String>,
    pub pdf_url: Option<String>,
    pub pdf_generated_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl Invoice {
    pub fn totals(&self) -> InvoiceTotals {
        InvoiceTotals::from_items(&self.items)
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_settled() && self.due_date < now
    }

    /// Whole days past the due date (zero when not yet due).
    pub fn days_overdue(&self, now: DateTime<Utc>) -> i64 {
        (now - self.due_date).num_days().max(0)
    }

    /// Apply a status change, stamping `sent_at` / `paid_at` on first transition.
    pub fn set_status(&mut self, status: InvoiceStatus, now: DateTime<Utc>) {
        self.status = status;
        match status {
            InvoiceStatus::Sent if self.sent_at.is_none() => self.sent_at = Some(now),
            InvoiceStatus::Paid if self.paid_at.is_none() => self.paid_at = Some(now),
            _ => {}
        }
    }

    pub fn attach_pdf(&mut self, url: impl Into<String>, now: DateTime<Utc>) {
        self.pdf_url = Some(url.into());
        self.pdf_generated_at = Some(now);
    }

    /// Object-storage key for the rendered document.
    pub fn document_key(&self) -> String {
        format!("invoices/{}/{}.pdf", self.tenant_id, self.number)
    }

    /// Event payload describing this invoice for automation triggers.
    ///
    /// Field names follow the camelCase keys automation templates refer to
    /// (`{{invoiceNumber}}`, `{{clientName}}`, ...).
    pub fn event_data(&self, now: DateTime<Utc>) -> Map<String, JsonValue> {
        let totals = self.totals();
        let mut data = Map::new();
        data.insert("invoiceId".into(), json!(self.id.to_string()));
        data.insert("invoiceNumber".into(), json!(self.number));
        data.insert("clientName".into(), json!(self.client.name));
        data.insert("clientEmail".into(), json!(self.client.email));
        data.insert("clientPhone".into(), json!(self.client.phone));
        data.insert("currency".into(), json!(self.currency));
        data.insert(
            "total".into(),
            json!(crate::money::format_money(totals.total, &self.currency)),
        );
        data.insert("dueDate".into(), json!(self.due_date.format("%Y-%m-%d").to_string()));
        if self.is_overdue(now) {
            data.insert("status".into(), json!(InvoiceStatus::Overdue.as_str()));
            data.insert("daysOverdue".into(), json!(self.days_overdue(now)));
        } else {
            data.insert("status".into(), json!(self.status.as_str()));
            data.insert("daysOverdue".into(), json!(0));
        }
        data
    }
}

/// `INV-<year>-<sequence>`, the sequence zero-padded to four digits.
pub fn invoice_number(year: i32, sequence: u32) -> String {
    format!("INV-{year}-{sequence:04}")
}

/// Sequence part of a number issued in `year`, if it has that shape.
pub fn number_sequence(number: &str, year: i32) -> Option<u32> {
    number
        .strip_prefix(&format!("INV-{year}-"))?
        .parse()
        .ok()
}

fn default_currency() -> String {
    "USD".to_string()
}

/// Caller-supplied fields of a new invoice. Number, status and id are
/// assigned on creation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InvoiceDraft {
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub issuer: Issuer,
    pub client: ClientContact,
    #[serde(default)]
    pub issue_date: Option<DateTime<Utc>>,
    pub due_date: DateTime<Utc>,
    pub items: Vec<LineItem>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl InvoiceDraft {
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), DomainError> {
        if self.client.name.trim().is_empty() {
            return Err(DomainError::validation("Client name is required"));
        }
        let email = self.client.email.as_deref().map(str::trim).unwrap_or_default();
        match email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && domain.contains('.') => {}
            _ => return Err(DomainError::validation("Invalid email address")),
        }
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(DomainError::validation("Currency must be a 3-letter code"));
        }
        if self.items.is_empty() {
            return Err(DomainError::validation("At least one item is required"));
        }
        for item in &self.items {
            if item.description.trim().is_empty() {
                return Err(DomainError::validation("Description is required"));
            }
            if item.quantity == 0 {
                return Err(DomainError::validation("Quantity must be positive"));
            }
            let in_range = |p: f64| (0.0..=100.0).contains(&p);
            if !in_range(item.discount_percent) || !in_range(item.tax_rate_percent) {
                return Err(DomainError::validation(
                    "Discount and tax rate must be between 0 and 100",
                ));
            }
        }
        if self.due_date.date_naive() < now.date_naive() {
            return Err(DomainError::validation("Due date must be today or in the future"));
        }
        Ok(())
    }

    /// Validate and build a `draft` invoice numbered `number`.
    pub fn into_invoice(
        self,
        tenant_id: TenantId,
        number: String,
        now: DateTime<Utc>,
    ) -> Result<Invoice, DomainError> {
        self.validate(now)?;
        Ok(Invoice {
            id: InvoiceId::new(),
            tenant_id,
            number,
            status: InvoiceStatus::Draft,
            currency: self.currency.to_ascii_uppercase(),
            issuer: self.issuer,
            client: self.client,
            issue_date: self.issue_date.unwrap_or(now),
            due_date: self.due_date,
            items: self.items,
            notes: self.notes,
            pdf_url: None,
            pdf_generated_at: None,
            sent_at: None,
            paid_at: None,
        })
    }
}
