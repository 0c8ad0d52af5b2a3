//! Invoicing domain module.
//!
//! Invoice records as the queue handlers and the automation engine see them,
//! plus the pure rendering helpers (money formatting, notification content,
//! printable layout). No IO, no HTTP, no storage.

pub mod document;
pub mod invoice;
pub mod money;
pub mod notification;

pub use document::{DocumentLine, InvoiceDocument};
pub use invoice::{
    ClientContact, Invoice, InvoiceDraft, InvoiceStatus, InvoiceTotals, Issuer, LineItem,
    invoice_number, number_sequence,
};
pub use money::format_money;
pub use notification::{EmailContent, invoice_email, invoice_whatsapp_message};
