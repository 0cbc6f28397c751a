//! Decimal arithmetic utilities for vault and hedge accounting.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Denominator of the strategy buffer (1_000_000 = 100%).
pub const MAX_BPS: u64 = 1_000_000;

/// Denominator of vault protocol fees (10_000 = 100%).
pub const FEE_BPS: u32 = 10_000;

/// Seconds in a (365 day) year, used to pro-rate management fees.
pub const SECONDS_PER_YEAR: i64 = 31_536_000;

/// Round a decimal to a specific number of decimal places.
pub fn round_to_precision(value: Decimal, decimals: u32) -> Decimal {
    value.round_dp(decimals)
}

/// Safe division that returns zero if divisor is zero.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

/// Convert a buffer expressed in parts of [`MAX_BPS`] to a fraction.
pub fn buffer_fraction(buffer: u64) -> Decimal {
    Decimal::from(buffer) / Decimal::from(MAX_BPS)
}

/// Convert fee basis points (parts of [`FEE_BPS`]) to a fraction.
pub fn fee_fraction(bps: u32) -> Decimal {
    Decimal::from(bps) / Decimal::from(FEE_BPS)
}

/// Whether `a` and `b` differ by at most `tolerance`.
pub fn within(a: Decimal, b: Decimal, tolerance: Decimal) -> bool {
    (a - b).abs() <= tolerance
}

/// Treat tiny negative residues (rounding) as zero.
pub fn clamp_non_negative(value: Decimal) -> Decimal {
    value.max(Decimal::ZERO)
}

/// Percentage helper used in log lines.
pub fn as_percent(fraction: Decimal) -> Decimal {
    (fraction * dec!(100)).round_dp(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_to_precision() {
        assert_eq!(round_to_precision(dec!(1.00041234), 4), dec!(1.0004));
        assert_eq!(round_to_precision(dec!(2.5), 0), dec!(2));
    }

    #[test]
    fn test_buffer_and_fee_fractions() {
        assert_eq!(buffer_fraction(200_000), dec!(0.2));
        assert_eq!(buffer_fraction(MAX_BPS), Decimal::ONE);
        assert_eq!(fee_fraction(2000), dec!(0.2));
        assert_eq!(fee_fraction(100), dec!(0.01));
    }

    #[test]
    fn test_safe_div() {
        assert_eq!(safe_div(dec!(10), Decimal::ZERO), Decimal::ZERO);
        assert_eq!(safe_div(dec!(10), dec!(4)), dec!(2.5));
    }

    #[test]
    fn test_within_and_clamp() {
        assert!(within(dec!(1.004), dec!(1), dec!(0.01)));
        assert!(!within(dec!(1.02), dec!(1), dec!(0.01)));
        assert_eq!(clamp_non_negative(dec!(-0.0000001)), Decimal::ZERO);
        assert_eq!(as_percent(dec!(0.1234)), dec!(12.34));
    }
}
