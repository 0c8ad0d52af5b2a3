//! Printable invoice layout.
//!
//! The layout is a flat list of styled text lines; turning it into document
//! bytes (PDF) is an infrastructure concern.

use crate::invoice::Invoice;
use crate::money::format_money;

/// A single line of printable text.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentLine {
    pub text: String,
    /// Font size in points.
    pub size: f32,
    pub bold: bool,
}

impl DocumentLine {
    fn regular(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            size: 10.0,
            bold: false,
        }
    }

    fn bold(text: impl Into<String>, size: f32) -> Self {
        Self {
            text: text.into(),
            size,
            bold: true,
        }
    }

    fn blank() -> Self {
        Self::regular("")
    }
}

/// Printable representation of an invoice.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceDocument {
    pub title: String,
    pub lines: Vec<DocumentLine>,
}

impl InvoiceDocument {
    pub fn from_invoice(invoice: &Invoice) -> Self {
        let money = |amount: u64| format_money(amount, &invoice.currency);
        let mut lines = Vec::new();

        let issuer = &invoice.issuer;
        lines.push(DocumentLine::bold(
            if issuer.name.is_empty() { "Your Company" } else { issuer.name.as_str() },
            20.0,
        ));
        lines.extend(issuer.address.iter().map(DocumentLine::regular));
        lines.extend(issuer.email.iter().map(DocumentLine::regular));
        lines.extend(
            issuer
                .tax_id
                .iter()
                .map(|tax_id| DocumentLine::regular(format!("Tax ID: {tax_id}"))),
        );
        lines.push(DocumentLine::blank());

        lines.push(DocumentLine::bold("INVOICE", 24.0));
        lines.push(DocumentLine::regular(format!("Invoice #: {}", invoice.number)));
        lines.push(DocumentLine::regular(format!(
            "Issue Date: {}",
            invoice.issue_date.format("%Y-%m-%d")
        )));
        lines.push(DocumentLine::regular(format!(
            "Due Date: {}",
            invoice.due_date.format("%Y-%m-%d")
        )));
        lines.push(DocumentLine::blank());

        lines.push(DocumentLine::bold("Bill To:", 12.0));
        lines.push(DocumentLine::regular(invoice.client.name.clone()));
        lines.extend(invoice.client.email.iter().map(DocumentLine::regular));
        lines.extend(invoice.client.phone.iter().map(DocumentLine::regular));
        lines.push(DocumentLine::blank());

        lines.push(DocumentLine::bold(
            format!("{:<40} {:>6} {:>14} {:>14}", "Description", "Qty", "Unit Price", "Amount"),
            10.0,
        ));
        for item in &invoice.items {
            lines.push(DocumentLine::regular(format!(
                "{:<40} {:>6} {:>14} {:>14}",
                truncate(&item.description, 40),
                item.quantity,
                money(item.unit_price),
                money(item.amount()),
            )));
        }
        lines.push(DocumentLine::blank());

        let totals = invoice.totals();
        lines.push(DocumentLine::regular(format!("Subtotal: {}", money(totals.subtotal))));
        if totals.discount_total > 0 {
            lines.push(DocumentLine::regular(format!(
                "Discount: -{}",
                money(totals.discount_total)
            )));
        }
        if totals.tax_total > 0 {
            lines.push(DocumentLine::regular(format!("Tax: {}", money(totals.tax_total))));
        }
        lines.push(DocumentLine::bold(format!("Total: {}", money(totals.total)), 12.0));

        if let Some(notes) = invoice.notes.as_deref().filter(|n| !n.trim().is_empty()) {
            lines.push(DocumentLine::blank());
            lines.push(DocumentLine::bold("Notes:", 10.0));
            lines.push(DocumentLine::regular(notes));
        }

        Self {
            title: format!("Invoice {}", invoice.number),
            lines,
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::tests::sample_invoice;

    #[test]
    fn layout_contains_header_items_and_total() {
        let invoice = sample_invoice();
        let doc = InvoiceDocument::from_invoice(&invoice);

        assert_eq!(doc.title, "Invoice INV-2024-0001");
        assert_eq!(doc.lines[0].text, "Acme Studio");
        assert!(doc.lines[0].bold);

        let texts: Vec<&str> = doc.lines.iter().map(|l| l.text.as_str()).collect();
        assert!(texts.iter().any(|t| t.starts_with("Design work")));
        assert!(texts.contains(&"Discount: -$5.00"));
        assert!(texts.contains(&"Total: $570.00"));
        assert!(texts.contains(&"Thank you for your business"));
    }
}
