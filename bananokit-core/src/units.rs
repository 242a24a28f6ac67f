//! Exact fixed-point conversion between raw ledger units and decimal BAN.
//!
//! One BAN is 10^29 raw. All arithmetic is integer `u128`; the full raw
//! supply fits, and no conversion ever touches floating point.

use crate::error::{WalletError, WalletResult};

/// Number of raw units in one BAN.
pub const RAW_PER_BAN: u128 = 100_000_000_000_000_000_000_000_000_000;

/// Number of decimal places in the raw scale.
pub const BAN_DECIMALS: usize = 29;

/// Converts a decimal BAN amount string (e.g. `"19.5"`) to raw units.
///
/// Accepts at most [`BAN_DECIMALS`] fractional digits.
///
/// # Errors
///
/// Returns [`WalletError::InvalidParams`] for empty, non-decimal, negative,
/// over-precise, or overflowing inputs.
pub fn ban_to_raw(amount: &str) -> WalletResult<u128> {
    let amount = amount.trim();
    if amount.is_empty() || amount == "." {
        return Err(WalletError::InvalidParams(
            "empty amount".to_string(),
        ));
    }

    let (integral, fraction) = match amount.split_once('.') {
        Some((i, f)) => (i, f),
        None => (amount, ""),
    };

    if fraction.len() > BAN_DECIMALS {
        return Err(WalletError::InvalidParams(format!(
            "more than {BAN_DECIMALS} decimal places"
        )));
    }
    if !integral.chars().all(|c| c.is_ascii_digit())
        || !fraction.chars().all(|c| c.is_ascii_digit())
    {
        return Err(WalletError::InvalidParams(format!(
            "not a decimal amount: {amount}"
        )));
    }

    let whole: u128 = if integral.is_empty() {
        0
    } else {
        integral
            .parse()
            .map_err(|_| WalletError::InvalidParams("amount overflows".to_string()))?
    };

    // Scale the fraction up to the full 29 digits.
    let mut frac_raw: u128 = 0;
    if !fraction.is_empty() {
        frac_raw = fraction
            .parse()
            .map_err(|_| WalletError::InvalidParams("amount overflows".to_string()))?;
        for _ in fraction.len()..BAN_DECIMALS {
            frac_raw = frac_raw
                .checked_mul(10)
                .ok_or_else(|| WalletError::InvalidParams("amount overflows".to_string()))?;
        }
    }

    whole
        .checked_mul(RAW_PER_BAN)
        .and_then(|w| w.checked_add(frac_raw))
        .ok_or_else(|| WalletError::InvalidParams("amount overflows".to_string()))
}

/// Converts a raw amount to its exact decimal BAN string.
///
/// The result carries no trailing fractional zeros; `raw_to_ban(0)` is `"0"`.
#[must_use]
pub fn raw_to_ban(raw: u128) -> String {
    let whole = raw / RAW_PER_BAN;
    let frac = raw % RAW_PER_BAN;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{frac:029}");
    let frac = frac.trim_end_matches('0');
    format!("{whole}.{frac}")
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("0", 0; "zero")]
    #[test_case("1", RAW_PER_BAN; "one ban")]
    #[test_case("19.5", 19 * RAW_PER_BAN + RAW_PER_BAN / 2; "fractional")]
    #[test_case("0.00000000000000000000000000001", 1; "single raw")]
    #[test_case(".5", RAW_PER_BAN / 2; "leading dot")]
    #[test_case("420.", 420 * RAW_PER_BAN; "trailing dot")]
    fn test_ban_to_raw(input: &str, expected: u128) {
        assert_eq!(ban_to_raw(input).expect("parse"), expected);
    }

    #[test_case(""; "empty")]
    #[test_case("."; "lone dot")]
    #[test_case("-1"; "negative")]
    #[test_case("1.2.3"; "double dot")]
    #[test_case("banano"; "letters")]
    #[test_case("0.000000000000000000000000000001"; "too precise")]
    #[test_case("999999999999999999999999999999999999999"; "overflow")]
    fn test_ban_to_raw_rejects(input: &str) {
        match ban_to_raw(input) {
            Err(WalletError::InvalidParams(_)) => {}
            Err(err) => panic!("unexpected error: {err}"),
            Ok(raw) => panic!("expected error, got {raw}"),
        }
    }

    #[test]
    fn test_raw_to_ban_rendering() {
        assert_eq!(raw_to_ban(0), "0");
        assert_eq!(raw_to_ban(RAW_PER_BAN), "1");
        assert_eq!(raw_to_ban(RAW_PER_BAN / 2), "0.5");
        assert_eq!(raw_to_ban(1), "0.00000000000000000000000000001");
        assert_eq!(
            raw_to_ban(1234 * RAW_PER_BAN + 25 * (RAW_PER_BAN / 100)),
            "1234.25"
        );
    }

    // Conversions must be lossless in both directions.
    #[test_case("0.1")]
    #[test_case("123456.000000000000000000000000001")]
    #[test_case("3402823669.20938463463374607431768211455"; "u128 max")]
    fn test_round_trip_exact(input: &str) {
        let raw = ban_to_raw(input).expect("parse");
        assert_eq!(raw_to_ban(raw), input);
        assert_eq!(ban_to_raw(&raw_to_ban(raw)).expect("reparse"), raw);
    }
}
