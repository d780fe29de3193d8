//! Utility functions and helpers

use rust_decimal::Decimal;
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Format a decimal amount with a fixed number of places
pub fn format_amount(amount: Decimal, places: u32) -> String {
    format!("{}", amount.round_dp(places))
}

/// Format a fraction (0.0123) as a percentage string ("1.2300%")
pub fn format_fraction_pct(fraction: Decimal) -> String {
    format!("{}%", (fraction * Decimal::ONE_HUNDRED).round_dp(4))
}

/// Raw integer token amount (as returned by the RPC) to UI units
pub fn raw_amount_to_decimal(raw: &str, decimals: u8) -> Option<Decimal> {
    let amount: i128 = raw.parse().ok()?;
    Decimal::try_from_i128_with_scale(amount, u32::from(decimals)).ok()
}

/// Serialize any `Display` value (pubkeys, signatures) as its string form
pub fn serialize_display<T: std::fmt::Display, S: serde::Serializer>(value: &T, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(value)
}

/// Generate unique ID
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_format_fraction_pct() {
        assert_eq!(format_fraction_pct(dec!(0.0123)), "1.2300%");
    }

    #[test]
    fn test_raw_amount_to_decimal() {
        assert_eq!(raw_amount_to_decimal("1500000", 6), Some(dec!(1.5)));
        assert_eq!(raw_amount_to_decimal("42", 0), Some(dec!(42)));
        assert_eq!(raw_amount_to_decimal("n/a", 6), None);
    }

    #[test]
    fn test_generate_id_is_unique() {
        assert_ne!(generate_id(), generate_id());
    }
}
