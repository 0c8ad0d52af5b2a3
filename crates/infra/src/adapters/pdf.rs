//! Invoice document rendering.
//!
//! [`PdfRenderer`] lays the printable invoice out on A4 pages using the PDF
//! base-14 Courier fonts, so no font files are embedded and column alignment
//! from the layout survives.

use std::io::Write;

use oryxa_invoicing::{DocumentLine, Invoice, InvoiceDocument};

use super::AdapterError;

const PAGE_WIDTH: f32 = 595.0;
const PAGE_HEIGHT: f32 = 842.0;
const MARGIN: f32 = 50.0;
const LINE_SPACING: f32 = 1.4;

/// Turns an invoice into document bytes.
pub trait DocumentRenderer: Send + Sync {
    fn content_type(&self) -> &'static str;

    fn render(&self, invoice: &Invoice) -> Result<Vec<u8>, AdapterError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PdfRenderer;

impl PdfRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl DocumentRenderer for PdfRenderer {
    fn content_type(&self) -> &'static str {
        "application/pdf"
    }

    fn render(&self, invoice: &Invoice) -> Result<Vec<u8>, AdapterError> {
        let document = InvoiceDocument::from_invoice(invoice);
        write_pdf(&document)
    }
}

/// Split lines into pages, returning one content stream per page.
fn page_streams(lines: &[DocumentLine]) -> Vec<String> {
    let mut pages = Vec::new();
    let mut stream = String::new();
    let mut y = PAGE_HEIGHT - MARGIN;

    for line in lines {
        let advance = line.size * LINE_SPACING;
        if y - advance < MARGIN && !stream.is_empty() {
            pages.push(std::mem::take(&mut stream));
            y = PAGE_HEIGHT - MARGIN;
        }
        y -= advance;
        if line.text.is_empty() {
            continue;
        }
        let font = if line.bold { "F2" } else { "F1" };
        stream.push_str(&format!(
            "BT /{font} {size:.1} Tf {x:.1} {y:.1} Td ({text}) Tj ET\n",
            size = line.size,
            x = MARGIN,
            text = escape_text(&line.text),
        ));
    }
    if !stream.is_empty() || pages.is_empty() {
        pages.push(stream);
    }
    pages
}

fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' | '(' | ')' => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_ascii() && !c.is_ascii_control() => out.push(c),
            _ => out.push('?'),
        }
    }
    out
}

fn write_pdf(document: &InvoiceDocument) -> Result<Vec<u8>, AdapterError> {
    let pages = page_streams(&document.lines);

    // 1 catalog, 2 page tree, 3/4 fonts, 5 info, then a (page, content) pair per page.
    let first_page_id = 6;
    let page_ids: Vec<usize> = (0..pages.len()).map(|i| first_page_id + i * 2).collect();

    let mut objects: Vec<Vec<u8>> = Vec::new();
    objects.push(b"<< /Type /Catalog /Pages 2 0 R >>".to_vec());
    let kids = page_ids
        .iter()
        .map(|id| format!("{id} 0 R"))
        .collect::<Vec<_>>()
        .join(" ");
    objects.push(format!("<< /Type /Pages /Kids [{kids}] /Count {} >>", pages.len()).into_bytes());
    objects.push(b"<< /Type /Font /Subtype /Type1 /BaseFont /Courier >>".to_vec());
    objects.push(b"<< /Type /Font /Subtype /Type1 /BaseFont /Courier-Bold >>".to_vec());
    objects.push(
        format!(
            "<< /Title ({}) /Producer (oryxa) >>",
            escape_text(&document.title)
        )
        .into_bytes(),
    );
    for (stream, page_id) in pages.iter().zip(&page_ids) {
        objects.push(
            format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {PAGE_WIDTH} {PAGE_HEIGHT}] \
                 /Resources << /Font << /F1 3 0 R /F2 4 0 R >> >> /Contents {} 0 R >>",
                page_id + 1
            )
            .into_bytes(),
        );
        let mut content = format!("<< /Length {} >>\nstream\n", stream.len()).into_bytes();
        content.extend_from_slice(stream.as_bytes());
        content.extend_from_slice(b"endstream");
        objects.push(content);
    }

    let mut out: Vec<u8> = Vec::new();
    out.write_all(b"%PDF-1.4\n")?;
    let mut offsets = Vec::with_capacity(objects.len());
    for (index, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        writeln!(out, "{} 0 obj", index + 1)?;
        out.write_all(body)?;
        out.write_all(b"\nendobj\n")?;
    }

    let xref_offset = out.len();
    writeln!(out, "xref\n0 {}\n0000000000 65535 f ", objects.len() + 1)?;
    for offset in offsets {
        writeln!(out, "{offset:010} 00000 n ")?;
    }
    writeln!(
        out,
        "trailer\n<< /Size {} /Root 1 0 R /Info 5 0 R >>\nstartxref\n{xref_offset}\n%%EOF",
        objects.len() + 1
    )?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use oryxa_core::{InvoiceId, TenantId};
    use oryxa_invoicing::{ClientContact, InvoiceStatus, Issuer, LineItem};

    fn invoice(items: usize) -> Invoice {
        let issued = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        Invoice {
            id: InvoiceId::new(),
            tenant_id: TenantId::new(),
            number: "INV-(7)".into(),
            status: InvoiceStatus::Draft,
            currency: "USD".into(),
            issuer: Issuer {
                name: "Acme".into(),
                ..Issuer::default()
            },
            client: ClientContact {
                name: "Zoë".into(),
                ..ClientContact::default()
            },
            issue_date: issued,
            due_date: issued,
            items: (0..items)
                .map(|i| LineItem::new(format!("Item {i}"), 1, 100))
                .collect(),
            notes: None,
            pdf_url: None,
            pdf_generated_at: None,
            sent_at: None,
            paid_at: None,
        }
    }

    #[test]
    fn renders_a_well_formed_pdf() {
        let bytes = PdfRenderer::new().render(&invoice(2)).unwrap();
        let text = String::from_utf8_lossy(&bytes);

        assert!(text.starts_with("%PDF-1.4"));
        assert!(text.trim_end().ends_with("%%EOF"));
        assert!(text.contains("/Count 1"));
        assert!(text.contains("(INVOICE) Tj"));
        assert!(text.contains("Invoice #: INV-\\(7\\)"));
    }

    #[test]
    fn non_ascii_text_is_replaced() {
        assert_eq!(escape_text("Zoë (a\\b)"), "Zo? \\(a\\\\b\\)");
    }

    #[test]
    fn long_invoices_span_pages() {
        let bytes = PdfRenderer::new().render(&invoice(120)).unwrap();
        let text = String::from_utf8_lossy(&bytes);

        assert!(!text.contains("/Count 1 "));
        assert!(text.matches("/Type /Page ").count() >= 2);
    }

    #[test]
    fn xref_offsets_point_at_objects() {
        let bytes = PdfRenderer::new().render(&invoice(1)).unwrap();
        let text = String::from_utf8_lossy(&bytes);
        let xref = text.find("xref\n").unwrap();
        let first_entry = text[xref..].lines().nth(3).unwrap();
        let offset: usize = first_entry[..10].parse().unwrap();

        assert!(text[offset..].starts_with("1 0 obj"));
    }
}
