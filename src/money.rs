//! Money Module
//!
//! Card balances and transfer amounts are `rust_decimal::Decimal` values in
//! the card currency with at most [`CARD_DECIMALS`] fractional digits.
//! Every client-supplied amount MUST pass through [`parse_amount`] or
//! [`validate_amount`] before it reaches ingestion.
//!
//! ## Design Principles
//! 1. Explicit Error Handling: no silent rounding or truncation
//! 2. Strict Format: "0.5" is accepted, ".5" and "5." are not
//! 3. Amounts are always strictly positive

use rust_decimal::prelude::*;
use thiserror::Error;

/// Fractional digits carried by card balances (cents)
pub const CARD_DECIMALS: u32 = 2;

/// Upper bound of a single transfer amount
pub const MAX_TRANSFER_AMOUNT: Decimal = Decimal::from_parts(1_000_000_000, 0, 0, false, 0);

/// Money conversion errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Precision overflow: provided {provided} decimals, max allowed {max}")]
    PrecisionOverflow { provided: u32, max: u32 },

    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Amount too large")]
    Overflow,

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

/// Parse a client amount string ("40", "12.50") into a validated Decimal.
pub fn parse_amount(amount_str: &str) -> Result<Decimal, MoneyError> {
    let amount_str = amount_str.trim();
    if amount_str.is_empty() {
        return Err(MoneyError::InvalidFormat("empty string".into()));
    }

    if amount_str.starts_with('-') {
        return Err(MoneyError::InvalidAmount);
    }
    if amount_str.starts_with('+') {
        return Err(MoneyError::InvalidFormat("explicit sign not allowed".into()));
    }

    let mut parts = amount_str.split('.');
    let whole = parts.next().unwrap_or_default();
    let frac = parts.next();
    if parts.next().is_some() {
        return Err(MoneyError::InvalidFormat("multiple decimal points".into()));
    }

    if whole.is_empty() {
        return Err(MoneyError::InvalidFormat(
            "missing leading zero (e.g., use 0.5 instead of .5)".into(),
        ));
    }
    if let Some(frac) = frac
        && frac.is_empty()
    {
        return Err(MoneyError::InvalidFormat(
            "missing fractional part (e.g., use 5.0 instead of 5.)".into(),
        ));
    }

    let all_digits = whole
        .chars()
        .chain(frac.unwrap_or_default().chars())
        .all(|c| c.is_ascii_digit());
    if !all_digits {
        return Err(MoneyError::InvalidFormat(format!(
            "invalid character in amount: {}",
            amount_str
        )));
    }

    let decimal = Decimal::from_str(amount_str).map_err(|e| {
        if e.to_string().contains("too large") || e.to_string().contains("overflow") {
            MoneyError::Overflow
        } else {
            MoneyError::InvalidFormat(e.to_string())
        }
    })?;

    validate_amount(decimal)
}

/// Validate an already-decoded Decimal amount.
pub fn validate_amount(amount: Decimal) -> Result<Decimal, MoneyError> {
    if amount.is_sign_negative() || amount.is_zero() {
        return Err(MoneyError::InvalidAmount);
    }

    // Trailing zeros ("40.00") are not extra precision
    let normalized = amount.normalize();
    if normalized.scale() > CARD_DECIMALS {
        return Err(MoneyError::PrecisionOverflow {
            provided: normalized.scale(),
            max: CARD_DECIMALS,
        });
    }

    if normalized > MAX_TRANSFER_AMOUNT {
        return Err(MoneyError::Overflow);
    }

    Ok(normalized)
}

/// Render an amount with the card precision ("60" -> "60.00").
pub fn format_amount(amount: Decimal) -> String {
    format!("{:.prec$}", amount, prec = CARD_DECIMALS as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_whole_and_fractional() {
        assert_eq!(parse_amount("40").unwrap(), dec!(40));
        assert_eq!(parse_amount("12.5").unwrap(), dec!(12.5));
        assert_eq!(parse_amount("0.01").unwrap(), dec!(0.01));
        assert_eq!(parse_amount(" 7.10 ").unwrap(), dec!(7.1));
    }

    #[test]
    fn test_parse_rejects_non_positive() {
        assert_eq!(parse_amount("0"), Err(MoneyError::InvalidAmount));
        assert_eq!(parse_amount("0.00"), Err(MoneyError::InvalidAmount));
        assert_eq!(parse_amount("-5"), Err(MoneyError::InvalidAmount));
    }

    #[test]
    fn test_parse_rejects_bad_format() {
        assert!(matches!(parse_amount(""), Err(MoneyError::InvalidFormat(_))));
        assert!(matches!(parse_amount(".5"), Err(MoneyError::InvalidFormat(_))));
        assert!(matches!(parse_amount("5."), Err(MoneyError::InvalidFormat(_))));
        assert!(matches!(parse_amount("1.2.3"), Err(MoneyError::InvalidFormat(_))));
        assert!(matches!(parse_amount("1e3"), Err(MoneyError::InvalidFormat(_))));
        assert!(matches!(parse_amount("+3"), Err(MoneyError::InvalidFormat(_))));
    }

    #[test]
    fn test_parse_rejects_extra_precision() {
        assert_eq!(
            parse_amount("1.005"),
            Err(MoneyError::PrecisionOverflow {
                provided: 3,
                max: CARD_DECIMALS
            })
        );
        // Trailing zeros are fine
        assert_eq!(parse_amount("1.500").unwrap(), dec!(1.5));
    }

    #[test]
    fn test_validate_amount_upper_bound() {
        assert_eq!(validate_amount(MAX_TRANSFER_AMOUNT).unwrap(), MAX_TRANSFER_AMOUNT);
        assert_eq!(
            validate_amount(MAX_TRANSFER_AMOUNT + dec!(0.01)),
            Err(MoneyError::Overflow)
        );
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(dec!(60)), "60.00");
        assert_eq!(format_amount(dec!(12.5)), "12.50");
    }
}
