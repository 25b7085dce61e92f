use alloy::primitives::U256;
use anyhow::{Context, Result, bail};
use chrono::{DateTime, NaiveDate};
use rust_decimal::Decimal;

/// Digits a `Decimal` mantissa can always hold.
const MAX_DIGITS: usize = 28;

/// Convert a raw on-chain integer amount to human units exactly, without ever
/// passing through a binary float.
///
/// Amounts wider than 28 significant digits lose their least-significant
/// fractional digits; an integer part wider than that is an error (no real
/// token amount gets there).
pub fn u256_to_decimal(raw: U256, decimals: u32) -> Result<Decimal> {
    let digits = raw.to_string();
    let decimals = decimals as usize;

    let (int_part, frac_part) = if digits.len() > decimals {
        let (i, f) = digits.split_at(digits.len() - decimals);
        (i.to_string(), f.to_string())
    } else {
        (
            "0".to_string(),
            format!("{}{}", "0".repeat(decimals - digits.len()), digits),
        )
    };

    let int_digits = if int_part == "0" { 0 } else { int_part.len() };
    if int_digits > MAX_DIGITS {
        bail!("amount {digits} with {decimals} decimals exceeds representable range");
    }

    let keep = MAX_DIGITS - int_digits;
    let frac = if frac_part.len() > keep {
        &frac_part[..keep]
    } else {
        &frac_part[..]
    };

    let rendered = if frac.is_empty() {
        int_part
    } else {
        format!("{int_part}.{frac}")
    };
    rendered
        .parse::<Decimal>()
        .with_context(|| format!("parse decimal from {rendered}"))
}

pub fn wei_to_native(wei: U256) -> Result<Decimal> {
    u256_to_decimal(wei, 18)
}

pub fn wei_to_gwei(wei: U256) -> Result<Decimal> {
    u256_to_decimal(wei, 9)
}

/// UTC calendar date of a block timestamp; the bucket key component.
pub fn utc_date(timestamp: u64) -> Result<NaiveDate> {
    let ts = i64::try_from(timestamp).context("timestamp out of range")?;
    Ok(DateTime::from_timestamp(ts, 0)
        .context("timestamp out of chrono range")?
        .date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).expect("test literal")
    }

    #[test]
    fn converts_whole_token_amounts() {
        let raw = U256::from_str("1000000000000000000000").expect("1e21");
        assert_eq!(u256_to_decimal(raw, 18).expect("convert"), dec("1000"));

        let raw = U256::from(1_000_000_000u64);
        assert_eq!(u256_to_decimal(raw, 6).expect("convert"), dec("1000"));
    }

    #[test]
    fn converts_fractional_amounts() {
        let raw = U256::from_str("50000000000000000").expect("5e16");
        assert_eq!(u256_to_decimal(raw, 18).expect("convert"), dec("0.05"));

        assert_eq!(u256_to_decimal(U256::from(1u8), 18).expect("convert"), dec("0.000000000000000001"));
    }

    #[test]
    fn zero_decimals_passes_through() {
        assert_eq!(u256_to_decimal(U256::from(42u8), 0).expect("convert"), dec("42"));
    }

    #[test]
    fn truncates_excess_fractional_digits() {
        // 28 integer digits leave no room for the fraction.
        let raw = U256::from_str("12345678901234567890123456789999999999999999").expect("wide");
        let out = u256_to_decimal(raw, 16).expect("convert");
        assert_eq!(out, dec("1234567890123456789012345678"));
    }

    #[test]
    fn rejects_unrepresentable_integer_part() {
        let raw = U256::from_str("123456789012345678901234567890").expect("30 digits");
        assert!(u256_to_decimal(raw, 0).is_err());
    }

    #[test]
    fn gas_helpers_use_native_scales() {
        let raw = U256::from(50_000_000_000u64);
        assert_eq!(wei_to_gwei(raw).expect("gwei"), dec("50"));
        assert_eq!(wei_to_native(raw).expect("native"), dec("0.00000005"));
    }

    #[test]
    fn block_timestamps_map_to_utc_dates() {
        // 2022-06-01 00:00:10 UTC
        assert_eq!(
            utc_date(1_654_041_610).expect("date"),
            NaiveDate::from_ymd_opt(2022, 6, 1).expect("ymd")
        );
        // One second before midnight stays on the previous day.
        assert_eq!(
            utc_date(1_654_041_599).expect("date"),
            NaiveDate::from_ymd_opt(2022, 5, 31).expect("ymd")
        );
    }
}
