//! Amount conversion utilities
//!
//! Amounts travel across every connector boundary as decimal strings in coin
//! units and are converted here into `bitcoin::Amount` (integer smallest
//! units) for internal arithmetic. Floating point is never involved.
//!
//! Example:
//! ```
//! use connector_common::math::{parse_amount, amount_to_decimal};
//!
//! let amount = parse_amount("0.00012345").unwrap();
//! assert_eq!(amount.to_sat(), 12_345);
//! assert_eq!(amount_to_decimal(amount).to_string(), "0.00012345");
//! ```

use bitcoin::Amount;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::error::{ConnectorError, ConnectorResult};
use crate::types::{AMOUNT_PRECISION, MAX_BITCOIN_SUPPLY, SATS_PER_BTC};

/// Parse a decimal coin amount string into smallest units
///
/// Leading and trailing whitespace is ignored. The amount must be
/// non-negative, carry at most eight fractional digits and must not exceed
/// the maximum supply.
///
/// # Errors
/// * `ConnectorError::InvalidAmount` for malformed, negative, over-precise
///   or excessive values
pub fn parse_amount(input: &str) -> ConnectorResult<Amount> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ConnectorError::InvalidAmount("empty amount".to_string()));
    }

    let value = Decimal::from_str(trimmed)
        .map_err(|e| ConnectorError::InvalidAmount(format!("{}: {}", trimmed, e)))?;

    decimal_to_amount(value)
}

/// Parse an optional amount, treating an empty string as zero
///
/// Invoice issuance accepts "no amount" to mean "any amount".
pub fn parse_optional_amount(input: &str) -> ConnectorResult<Amount> {
    if input.trim().is_empty() {
        Ok(Amount::ZERO)
    } else {
        parse_amount(input)
    }
}

/// Convert a decimal coin amount into smallest units
pub fn decimal_to_amount(value: Decimal) -> ConnectorResult<Amount> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(ConnectorError::InvalidAmount(format!(
            "negative amount not allowed: {}",
            value
        )));
    }

    let normalized = value.normalize();
    if normalized.scale() > AMOUNT_PRECISION {
        return Err(ConnectorError::InvalidAmount(format!(
            "amount {} has more than {} fractional digits",
            value, AMOUNT_PRECISION
        )));
    }

    let sats = (normalized * Decimal::from(SATS_PER_BTC))
        .to_u64()
        .ok_or_else(|| ConnectorError::InvalidAmount(format!("amount out of range: {}", value)))?;

    if sats > MAX_BITCOIN_SUPPLY {
        return Err(ConnectorError::InvalidAmount(format!(
            "amount {} exceeds maximum supply",
            value
        )));
    }

    Ok(Amount::from_sat(sats))
}

/// Convert smallest units into a decimal coin amount
pub fn amount_to_decimal(amount: Amount) -> Decimal {
    sats_to_decimal(amount.to_sat())
}

/// Convert a raw smallest-unit count into a decimal coin amount
pub fn sats_to_decimal(sats: u64) -> Decimal {
    Decimal::from_i128_with_scale(sats as i128, AMOUNT_PRECISION).normalize()
}

/// Render an amount in coin units for logs and error messages
pub fn format_amount(amount: Amount) -> String {
    amount_to_decimal(amount).to_string()
}
