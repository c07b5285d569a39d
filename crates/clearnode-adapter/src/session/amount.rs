/*
[INPUT]:  User-supplied and stored deposit amount strings
[OUTPUT]: Normalized positive decimal amounts for allocations
[POS]:    Session layer - local amount validation before any network I/O
[UPDATE]: When asset precision or amount formatting rules change
*/

use std::str::FromStr;

use rust_decimal::Decimal;

use crate::error::{ClearnodeError, Result};

/// Decimal places kept for allocation amounts (USDC precision)
pub const AMOUNT_SCALE: u32 = 6;

/// Parse a deposit amount and format it for the wire.
///
/// Accepts finite positive decimals; the result is rounded to six places with
/// trailing zeros removed (`"10.500000"` -> `"10.5"`).
pub fn normalize_deposit(input: &str) -> Result<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ClearnodeError::InvalidAmount("amount is empty".to_string()));
    }

    let amount = Decimal::from_str(trimmed).map_err(|_| {
        ClearnodeError::InvalidAmount(format!("{trimmed:?} is not a decimal number"))
    })?;
    if amount <= Decimal::ZERO {
        return Err(ClearnodeError::InvalidAmount(format!(
            "{trimmed} must be a positive number"
        )));
    }

    let rounded = amount.round_dp(AMOUNT_SCALE).normalize();
    if rounded.is_zero() {
        return Err(ClearnodeError::InvalidAmount(format!(
            "{trimmed} rounds to zero at {AMOUNT_SCALE} decimal places"
        )));
    }

    Ok(rounded.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("0")]
    #[case("-1")]
    #[case("abc")]
    #[case("")]
    #[case("   ")]
    #[case("NaN")]
    #[case("inf")]
    #[case("0.0000001")]
    #[case("1,5")]
    fn test_rejects_invalid_amounts(#[case] input: &str) {
        assert!(matches!(
            normalize_deposit(input),
            Err(ClearnodeError::InvalidAmount(_))
        ));
    }

    #[rstest]
    #[case("0.0001", "0.0001")]
    #[case("10", "10")]
    #[case("10.500000", "10.5")]
    #[case(" 2.25 ", "2.25")]
    #[case("1.23456789", "1.234568")]
    fn test_accepts_and_normalizes(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_deposit(input).unwrap(), expected);
    }
}
