//! Outbound notification content for invoices (email and WhatsApp).

use crate::invoice::Invoice;
use crate::money::format_money;

/// Rendered email subject and HTML body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailContent {
    pub subject: String,
    pub html: String,
}

/// Email announcing a new invoice, with a download link when the PDF exists.
pub fn invoice_email(invoice: &Invoice, pdf_url: Option<&str>) -> EmailContent {
    let company = company_name(invoice);
    let subject = format!("Invoice {} from {}", invoice.number, company);
    let total = format_money(invoice.totals().total, &invoice.currency);
    let due = invoice.due_date.format("%B %-d, %Y");

    let download = match pdf_url {
        Some(url) => format!(
            r#"<p>You can download your invoice using the link below:</p>
      <p><a href="{url}" class="button">Download Invoice PDF</a></p>"#
        ),
        None => String::new(),
    };

    let html = format!(
        r#"<!DOCTYPE html>
<html>
  <body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333;">
    <div style="max-width: 600px; margin: 0 auto; padding: 20px;">
      <h1>Invoice {number}</h1>
      <p>Dear {client},</p>
      <p>Please find your invoice <strong>{number}</strong> for the amount of <strong>{total}</strong>.</p>
      <p><strong>Due Date:</strong> {due}</p>
      {download}
      <p>If you have any questions, please don't hesitate to contact us.</p>
      <p>Best regards,<br>{company}</p>
      <p style="color: #999; font-size: 12px;">This is an automated email. Please do not reply.</p>
    </div>
  </body>
</html>"#,
        number = invoice.number,
        client = invoice.client.name,
    );

    EmailContent { subject, html }
}

/// Short WhatsApp text announcing a new invoice.
pub fn invoice_whatsapp_message(invoice: &Invoice, pdf_url: Option<&str>) -> String {
    let total = format_money(invoice.totals().total, &invoice.currency);
    let due = invoice.due_date.format("%Y-%m-%d");
    let mut message = format!(
        "Hi {}! Your invoice {} is ready. Amount: {}. Due: {}.",
        invoice.client.name, invoice.number, total, due
    );
    if let Some(url) = pdf_url {
        message.push_str(&format!(" Download: {url}"));
    }
    message
}

fn company_name(invoice: &Invoice) -> &str {
    if invoice.issuer.name.trim().is_empty() {
        "Company"
    } else {
        &invoice.issuer.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::tests::sample_invoice;

    #[test]
    fn email_subject_names_invoice_and_company() {
        let invoice = sample_invoice();
        let email = invoice_email(&invoice, Some("https://files.test/inv.pdf"));

        assert_eq!(email.subject, "Invoice INV-2024-0001 from Acme Studio");
        assert!(email.html.contains("Dear Jane Doe"));
        assert!(email.html.contains("$570.00"));
        assert!(email.html.contains("https://files.test/inv.pdf"));
    }

    #[test]
    fn email_without_pdf_has_no_download_link() {
        let mut invoice = sample_invoice();
        invoice.issuer.name = String::new();
        let email = invoice_email(&invoice, None);

        assert_eq!(email.subject, "Invoice INV-2024-0001 from Company");
        assert!(!email.html.contains("Download Invoice PDF"));
    }

    #[test]
    fn whatsapp_message_mentions_amount_and_link() {
        let invoice = sample_invoice();
        let message = invoice_whatsapp_message(&invoice, Some("https://files.test/inv.pdf"));

        assert_eq!(
            message,
            "Hi Jane Doe! Your invoice INV-2024-0001 is ready. Amount: $570.00. Due: 2024-03-15. Download: https://files.test/inv.pdf"
        );
    }
}
