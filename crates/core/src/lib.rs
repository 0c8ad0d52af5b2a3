//! `oryxa-core` — shared identifiers and the domain error model.
//!
//! No infrastructure concerns live here.

pub mod error;
pub mod id;

pub use error::DomainError;
pub use id::{AutomationId, InvoiceId, TenantId, parse_optional_id};
