//! Persistent invoice records consumed by handlers and the automation engine.

mod invoices;
mod postgres;

pub use invoices::{InMemoryInvoiceStore, InvoiceStore, InvoiceStoreError};
pub use postgres::PostgresInvoiceStore;

#[cfg(test)]
pub(crate) use invoices::tests::invoice_for;
