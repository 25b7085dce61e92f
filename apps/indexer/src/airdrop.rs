use std::str::FromStr;

use rust_decimal::Decimal;

/// Native-token gas drop paid to the receiver of an IN transaction.
///
/// Amounts changed over each chain's lifetime; ranges are inclusive on both
/// ends, `from: None` means "from genesis", `to: None` means "still active".
#[derive(Debug, Clone, Copy)]
struct AirdropRange {
    from: Option<u64>,
    to: Option<u64>,
    amount: &'static str,
}

const fn r(from: Option<u64>, to: Option<u64>, amount: &'static str) -> AirdropRange {
    AirdropRange { from, to, amount }
}

const AIRDROPS: &[(&str, &[AirdropRange])] = &[
    ("polygon", &[
        r(None, Some(20_335_948), "0.0003"),
        r(Some(20_335_949), None, "0.02"),
    ]),
    ("bsc", &[
        r(None, Some(12_038_426), "0.001"),
        r(Some(12_038_427), None, "0.002"),
    ]),
    ("avalanche", &[
        r(None, Some(7_164_612), "0.05"),
        r(Some(7_164_613), None, "0.025"),
    ]),
    ("fantom", &[r(None, None, "0.4")]),
    ("harmony", &[r(None, None, "0.1")]),
    ("boba", &[r(None, None, "0.005")]),
    ("optimism", &[r(None, None, "0.002")]),
    ("arbitrum", &[r(None, None, "0.003")]),
    ("moonriver", &[r(None, None, "0.1")]),
    ("moonbeam", &[r(None, None, "0.01")]),
    // ethereum and aurora never airdropped.
];

pub fn airdrop_for(chain: &str, block: u64) -> Decimal {
    let Some((_, ranges)) = AIRDROPS.iter().find(|(name, _)| *name == chain) else {
        return Decimal::ZERO;
    };

    for range in *ranges {
        let lo_ok = range.from.is_none_or(|lo| block >= lo);
        let hi_ok = range.to.is_none_or(|hi| block <= hi);
        if lo_ok && hi_ok {
            return Decimal::from_str(range.amount).expect("static airdrop amount");
        }
    }

    Decimal::ZERO
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).expect("test literal")
    }

    #[test]
    fn polygon_boundary_blocks_are_inclusive() {
        assert_eq!(airdrop_for("polygon", 20_000_000), dec("0.0003"));
        assert_eq!(airdrop_for("polygon", 20_335_948), dec("0.0003"));
        assert_eq!(airdrop_for("polygon", 20_335_949), dec("0.02"));
        assert_eq!(airdrop_for("polygon", 30_000_000), dec("0.02"));
    }

    #[test]
    fn open_lower_bound_covers_block_zero() {
        assert_eq!(airdrop_for("bsc", 0), dec("0.001"));
        assert_eq!(airdrop_for("fantom", 0), dec("0.4"));
    }

    #[test]
    fn open_upper_bound_covers_arbitrarily_high_blocks() {
        assert_eq!(airdrop_for("harmony", u64::MAX), dec("0.1"));
    }

    #[test]
    fn chains_without_a_table_pay_nothing() {
        assert_eq!(airdrop_for("ethereum", 15_000_000), Decimal::ZERO);
        assert_eq!(airdrop_for("aurora", 60_000_000), Decimal::ZERO);
    }
}
