//! Fixed-point arithmetic over 256-bit unsigned integers.
//!
//! Every division rounds down. Valuations therefore err on the side of
//! undervaluing collateral, never overvaluing it.

pub mod liquidity;
pub mod tick;

use primitive_types::{U256, U512};

/// 1.0 with 18 decimals.
pub const WAD: U256 = U256([1_000_000_000_000_000_000, 0, 0, 0]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MathError {
    #[error("division by zero")]
    DivideByZero,
    #[error("arithmetic overflow")]
    Overflow,
    #[error("tick {0} is outside the supported tick range")]
    TickOutOfRange(i32),
}

/// `floor(x * y / denominator)` with a 512-bit intermediate product.
///
/// Fails on a zero denominator or when the quotient does not fit in 256 bits.
pub fn mul_div_down(x: U256, y: U256, denominator: U256) -> Result<U256, MathError> {
    if denominator.is_zero() {
        return Err(MathError::DivideByZero);
    }
    let product: U512 = x.full_mul(y);
    let quotient = product / U512::from(denominator);
    U256::try_from(quotient).map_err(|_| MathError::Overflow)
}

pub fn checked_add(a: U256, b: U256) -> Result<U256, MathError> {
    a.checked_add(b).ok_or(MathError::Overflow)
}

pub fn checked_mul(a: U256, b: U256) -> Result<U256, MathError> {
    a.checked_mul(b).ok_or(MathError::Overflow)
}

/// Narrow a 256-bit value to `u128`, failing instead of truncating.
pub fn to_u128(value: U256) -> Result<u128, MathError> {
    if value > U256::from(u128::MAX) {
        return Err(MathError::Overflow);
    }
    Ok(value.low_u128())
}

/// `10^decimals`, the raw-unit scale of an asset with the given decimals.
pub fn unit_for_decimals(decimals: u8) -> Result<U256, MathError> {
    if decimals > 77 {
        return Err(MathError::Overflow);
    }
    Ok(U256::exp10(decimals as usize))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mul_div_down_floors() {
        let result = mul_div_down(U256::from(10u64), U256::from(10u64), U256::from(3u64)).unwrap();
        assert_eq!(result, U256::from(33u64));
    }

    #[test]
    fn mul_div_down_survives_wide_intermediate() {
        // MAX * 2 overflows 256 bits, dividing by 4 brings it back in range.
        let result = mul_div_down(U256::MAX, U256::from(2u64), U256::from(4u64)).unwrap();
        assert_eq!(result, U256::MAX / U256::from(2u64));
    }

    #[test]
    fn mul_div_down_rejects_zero_denominator() {
        let err = mul_div_down(U256::one(), U256::one(), U256::zero()).unwrap_err();
        assert_eq!(err, MathError::DivideByZero);
    }

    #[test]
    fn mul_div_down_rejects_overflowing_quotient() {
        let err = mul_div_down(U256::MAX, U256::from(2u64), U256::one()).unwrap_err();
        assert_eq!(err, MathError::Overflow);
    }

    #[test]
    fn wad_is_ten_to_the_eighteen() {
        assert_eq!(WAD, U256::exp10(18));
    }

    #[test]
    fn to_u128_rejects_wide_values() {
        assert_eq!(to_u128(U256::from(u128::MAX)).unwrap(), u128::MAX);
        assert_eq!(
            to_u128(U256::from(u128::MAX) + U256::one()).unwrap_err(),
            MathError::Overflow
        );
    }
}
