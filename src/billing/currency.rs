use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{AppError, AppResult};

const ZERO_DECIMAL: &[&str] = &[
    "BIF", "CLP", "DJF", "GNF", "JPY", "KMF", "KRW", "MGA", "PYG", "RWF", "UGX", "VND", "VUV",
    "XAF", "XOF", "XPF",
];

const THREE_DECIMAL: &[&str] = &["BHD", "JOD", "KWD", "OMR", "TND"];

/// Validated ISO 4217 code, upper case.
pub fn normalize_currency(currency: &str) -> AppResult<String> {
    let code = currency.trim().to_ascii_uppercase();
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(AppError::validation(format!("invalid currency code: {currency}")));
    }
    Ok(code)
}

pub fn minor_unit_exponent(currency: &str) -> AppResult<u32> {
    let code = normalize_currency(currency)?;
    Ok(if ZERO_DECIMAL.contains(&code.as_str()) {
        0
    } else if THREE_DECIMAL.contains(&code.as_str()) {
        3
    } else {
        2
    })
}

/// Converts a major-unit amount to the integer minor units providers expect.
/// Rounds half away from zero.
pub fn to_minor_units(amount: Decimal, currency: &str) -> AppResult<i64> {
    let exponent = minor_unit_exponent(currency)?;
    let scaled = amount
        .checked_mul(Decimal::from(10_i64.pow(exponent)))
        .ok_or_else(|| AppError::validation(format!("amount {amount} overflows {currency}")))?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    scaled
        .to_i64()
        .ok_or_else(|| AppError::validation(format!("amount {amount} overflows {currency}")))
}
