//! Currency formatting for amounts held in smallest currency units.

/// Format an amount (in minor units) for display, e.g. `123456` USD → `$1,234.56`.
///
/// Currencies without a known symbol are prefixed with their ISO code.
pub fn format_money(amount_minor: u64, currency: &str) -> String {
    let code = currency.trim().to_ascii_uppercase();
    let major = group_thousands(amount_minor / 100);
    let cents = amount_minor % 100;

    match symbol(&code) {
        Some(symbol) => format!("{symbol}{major}.{cents:02}"),
        None => format!("{code} {major}.{cents:02}"),
    }
}

fn symbol(code: &str) -> Option<&'static str> {
    match code {
        "USD" => Some("$"),
        "EUR" => Some("€"),
        "GBP" => Some("£"),
        "INR" => Some("₹"),
        "JPY" => Some("¥"),
        _ => None,
    }
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_known_currencies_with_symbols() {
        assert_eq!(format_money(123_456, "usd"), "$1,234.56");
        assert_eq!(format_money(5, "EUR"), "€0.05");
        assert_eq!(format_money(100_000_000, "GBP"), "£1,000,000.00");
    }

    #[test]
    fn unknown_currency_falls_back_to_code() {
        assert_eq!(format_money(1_999, "chf"), "CHF 19.99");
    }
}
