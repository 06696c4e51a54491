//! Rendering of fixed-point amounts for people.
//!
//! Canonical values stay integers; these helpers only shape CLI output.

use primitive_types::U256;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::config::DisplayConfig;

/// Exact decimal for `value / 10^decimals`, when it fits rust_decimal's
/// 96-bit mantissa and 28-digit scale.
pub fn fixed_point_to_decimal(value: U256, decimals: u32) -> Option<Decimal> {
    if value > U256::from(u128::MAX >> 1) {
        return None;
    }
    Decimal::try_from_i128_with_scale(value.as_u128() as i128, decimals).ok()
}

/// Plain decimal string of a fixed-point value, trailing zeros stripped.
///
/// With `dp` set the value is rounded half away from zero. Values beyond
/// rust_decimal's range are truncated instead.
pub fn format_fixed_point(value: U256, decimals: u32, dp: Option<u32>) -> String {
    match fixed_point_to_decimal(value, decimals) {
        Some(decimal) => round(decimal, dp).normalize().to_string(),
        None => format_wide(value, decimals, dp),
    }
}

/// Fixed-point value shaped by the `[display]` settings.
pub fn format_value_display(value: U256, decimals: u32, display: &DisplayConfig) -> String {
    let mut s = format_fixed_point(value, decimals, display.value_decimals);
    if display.fixed_decimals {
        if let Some(dp) = display.value_decimals {
            s = pad_fraction(&s, dp);
        }
    }
    if display.grouping {
        s = group_thousands(&s);
    }
    s
}

fn round(value: Decimal, dp: Option<u32>) -> Decimal {
    match dp {
        Some(dp) => value.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero),
        None => value,
    }
}

fn format_wide(value: U256, decimals: u32, dp: Option<u32>) -> String {
    let digits = value.to_string();
    let decimals = decimals as usize;
    let (int_part, frac_part) = if digits.len() > decimals {
        let (i, f) = digits.split_at(digits.len() - decimals);
        (i.to_string(), f.to_string())
    } else {
        ("0".to_string(), format!("{digits:0>decimals$}"))
    };

    let mut frac = match dp {
        Some(dp) => frac_part.chars().take(dp as usize).collect::<String>(),
        None => frac_part,
    };
    while frac.ends_with('0') {
        frac.pop();
    }
    if frac.is_empty() {
        int_part
    } else {
        format!("{int_part}.{frac}")
    }
}

fn pad_fraction(s: &str, dp: u32) -> String {
    let (int_part, frac_part) = s.split_once('.').unwrap_or((s, ""));
    if dp == 0 {
        return int_part.to_string();
    }
    let dp = dp as usize;
    let frac: String = frac_part.chars().take(dp).collect();
    format!("{int_part}.{frac:0<dp$}")
}

fn group_thousands(s: &str) -> String {
    let (int_part, frac_part) = match s.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (s, None),
    };
    let len = int_part.len();
    let mut grouped = String::with_capacity(len + len / 3);
    for (i, ch) in int_part.chars().enumerate() {
        grouped.push(ch);
        let remaining = len - i - 1;
        if remaining > 0 && remaining % 3 == 0 {
            grouped.push(',');
        }
    }
    match frac_part {
        Some(f) if !f.is_empty() => format!("{grouped}.{f}"),
        _ => grouped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::WAD;

    #[test]
    fn wad_values_render_as_decimals() {
        let value = U256::from(1_500u64) * WAD + WAD / U256::from(4u64);
        assert_eq!(format_fixed_point(value, 18, None), "1500.25");
        assert_eq!(format_fixed_point(value, 18, Some(1)), "1500.3");
        assert_eq!(format_fixed_point(U256::zero(), 18, None), "0");
    }

    #[test]
    fn wide_values_fall_back_to_truncation() {
        let value = U256::exp10(40) + U256::from(5u64) * U256::exp10(17);
        assert!(fixed_point_to_decimal(value, 18).is_none());
        assert_eq!(format_fixed_point(value, 18, None), "10000000000000000000000.5");
        assert_eq!(format_fixed_point(value, 18, Some(0)), "10000000000000000000000");
    }

    #[test]
    fn small_wide_fraction_is_zero_padded() {
        assert_eq!(format_wide(U256::from(5u64), 3, None), "0.005");
    }

    #[test]
    fn display_groups_and_pads() {
        let display = DisplayConfig {
            value_decimals: Some(2),
            grouping: true,
            fixed_decimals: true,
        };
        let value = U256::from(1_234_567u64) * WAD + WAD / U256::from(2u64);
        assert_eq!(format_value_display(value, 18, &display), "1,234,567.50");
    }

    #[test]
    fn display_defaults_match_plain_format() {
        let value = U256::from(1_234u64) * WAD;
        assert_eq!(
            format_value_display(value, 18, &DisplayConfig::default()),
            format_fixed_point(value, 18, None)
        );
    }
}
