//! Token amounts held by a concentrated-liquidity position.
//!
//! Standard range-liquidity formulas over Q64.96 sqrt prices, rounded down.

use primitive_types::U256;

use super::tick::{sqrt_ratio_at_tick, MAX_SQRT_RATIO};
use super::{mul_div_down, MathError};

/// 2^96.
pub const Q96: U256 = U256([0, 1 << 32, 0, 0]);

const RESOLUTION: usize = 96;

/// Decimals of the price ratio before its square root is taken. The root
/// keeps half of them.
const RATIO_DECIMALS: usize = 28;

fn sorted(a: U256, b: U256) -> (U256, U256) {
    if a > b {
        (b, a)
    } else {
        (a, b)
    }
}

/// Amount of token0 for `liquidity` between two sqrt prices.
pub fn amount0_for_liquidity(
    sqrt_ratio_a: U256,
    sqrt_ratio_b: U256,
    liquidity: u128,
) -> Result<U256, MathError> {
    let (lower, upper) = sorted(sqrt_ratio_a, sqrt_ratio_b);
    if lower.is_zero() {
        return Err(MathError::DivideByZero);
    }
    let numerator = U256::from(liquidity) << RESOLUTION;
    let scaled = mul_div_down(numerator, upper - lower, upper)?;
    Ok(scaled / lower)
}

/// Amount of token1 for `liquidity` between two sqrt prices.
pub fn amount1_for_liquidity(
    sqrt_ratio_a: U256,
    sqrt_ratio_b: U256,
    liquidity: u128,
) -> Result<U256, MathError> {
    let (lower, upper) = sorted(sqrt_ratio_a, sqrt_ratio_b);
    mul_div_down(U256::from(liquidity), upper - lower, Q96)
}

/// Token amounts for `liquidity` over `[sqrt_ratio_a, sqrt_ratio_b]` when the
/// pool trades at `sqrt_price`. Outside the range the position is entirely in
/// one token.
pub fn amounts_for_liquidity(
    sqrt_price: U256,
    sqrt_ratio_a: U256,
    sqrt_ratio_b: U256,
    liquidity: u128,
) -> Result<(U256, U256), MathError> {
    let (lower, upper) = sorted(sqrt_ratio_a, sqrt_ratio_b);

    if sqrt_price <= lower {
        Ok((amount0_for_liquidity(lower, upper, liquidity)?, U256::zero()))
    } else if sqrt_price < upper {
        Ok((
            amount0_for_liquidity(sqrt_price, upper, liquidity)?,
            amount1_for_liquidity(lower, sqrt_price, liquidity)?,
        ))
    } else {
        Ok((U256::zero(), amount1_for_liquidity(lower, upper, liquidity)?))
    }
}

/// Largest amount of each token a position can ever hold: all token0 at the
/// lower bound, all token1 at the upper bound.
pub fn max_amounts_for_ticks(
    tick_lower: i32,
    tick_upper: i32,
    liquidity: u128,
) -> Result<(U256, U256), MathError> {
    let lower = sqrt_ratio_at_tick(tick_lower)?;
    let upper = sqrt_ratio_at_tick(tick_upper)?;
    Ok((
        amount0_for_liquidity(lower, upper, liquidity)?,
        amount1_for_liquidity(lower, upper, liquidity)?,
    ))
}

/// Synthetic Q64.96 sqrt price of token0 in token1 from two trusted prices.
///
/// Both prices are the value of 10^18 raw units with 18 decimals, so their
/// ratio is the raw-unit exchange rate the pool itself would quote.
pub fn sqrt_price_x96_from_prices(price0: U256, price1: U256) -> Result<U256, MathError> {
    if price1.is_zero() {
        return Ok(MAX_SQRT_RATIO);
    }
    let ratio = mul_div_down(price0, U256::exp10(RATIO_DECIMALS), price1)?;
    let sqrt_ratio = ratio.integer_sqrt();
    Ok((sqrt_ratio << RESOLUTION) / U256::exp10(RATIO_DECIMALS / 2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::WAD;

    fn dec(value: &str) -> U256 {
        U256::from_dec_str(value).unwrap()
    }

    #[test]
    fn q96_is_two_to_the_ninety_six() {
        assert_eq!(Q96, U256::one() << 96usize);
    }

    #[test]
    fn equal_prices_give_unit_sqrt_price() {
        assert_eq!(sqrt_price_x96_from_prices(WAD, WAD).unwrap(), Q96);
    }

    #[test]
    fn zero_price1_maps_to_max_ratio() {
        assert_eq!(
            sqrt_price_x96_from_prices(WAD, U256::zero()).unwrap(),
            MAX_SQRT_RATIO
        );
    }

    #[test]
    fn symmetric_range_in_range_splits_evenly() {
        let lower = sqrt_ratio_at_tick(-600).unwrap();
        let upper = sqrt_ratio_at_tick(600).unwrap();
        let liquidity = 1_000_000_000_000_000_000u128;

        let (amount0, amount1) = amounts_for_liquidity(Q96, lower, upper, liquidity).unwrap();
        assert_eq!(amount0, dec("29553010879137169"));
        assert_eq!(amount1, dec("29553010879137169"));
    }

    #[test]
    fn out_of_range_positions_are_single_sided() {
        let lower = sqrt_ratio_at_tick(-600).unwrap();
        let upper = sqrt_ratio_at_tick(600).unwrap();
        let liquidity = 1_000_000_000_000_000_000u128;

        let below = sqrt_price_x96_from_prices(WAD / U256::from(2u64), WAD).unwrap();
        assert_eq!(below, dec("56022770974785543774279018638"));
        let (amount0, amount1) = amounts_for_liquidity(below, lower, upper, liquidity).unwrap();
        assert_eq!(amount0, dec("60005999255049926"));
        assert!(amount1.is_zero());

        let above = sqrt_price_x96_from_prices(WAD * U256::from(2u64), WAD).unwrap();
        let (amount0, amount1) = amounts_for_liquidity(above, lower, upper, liquidity).unwrap();
        assert!(amount0.is_zero());
        assert_eq!(amount1, dec("60005999255049926"));
    }

    #[test]
    fn asymmetric_range_matches_reference() {
        let lower = sqrt_ratio_at_tick(-1_200).unwrap();
        let upper = sqrt_ratio_at_tick(300).unwrap();
        let liquidity = 123_456_789_012_345_678_901u128;

        let cases = [
            (
                WAD * U256::from(98u64) / U256::from(100u64),
                "78431879364700078196640683151",
                "3091341473927917854",
                "5948411670836138852",
            ),
            (
                WAD * U256::from(102u64) / U256::from(100u64),
                "80016521857015976779345985354",
                "621588215225393062",
                "8417670929481941124",
            ),
            (
                WAD / U256::from(10u64),
                "25054144837504164585791288239",
                "9471689157323501166",
                "0",
            ),
            (
                WAD * U256::from(10u64),
                "250541448375047191829288880896",
                "0",
                "9054931355321637581",
            ),
        ];

        for (price0, sqrt_price, amount0, amount1) in cases {
            let p = sqrt_price_x96_from_prices(price0, WAD).unwrap();
            assert_eq!(p, dec(sqrt_price));
            let amounts = amounts_for_liquidity(p, lower, upper, liquidity).unwrap();
            assert_eq!(amounts, (dec(amount0), dec(amount1)));
        }
    }

    #[test]
    fn mixed_decimal_prices_keep_their_precision() {
        // 10^18 raw units of an 18-decimal token at 0.00001 USD against a
        // 6-decimal stable at 1 USD.
        let price0 = U256::exp10(13);
        let price1 = U256::exp10(30);
        assert_eq!(
            sqrt_price_x96_from_prices(price0, price1).unwrap(),
            dec("250540841473982686841")
        );
        assert_eq!(
            sqrt_price_x96_from_prices(U256::exp10(10), price1).unwrap(),
            dec("7922816251426433759")
        );
    }

    #[test]
    fn max_amounts_are_single_sided_extremes() {
        let (max0, max1) = max_amounts_for_ticks(-1_200, 300, 123_456_789_012_345_678_901).unwrap();
        assert_eq!(max0, dec("9471689157323501166"));
        assert_eq!(max1, dec("9054931355321637581"));
    }
}
