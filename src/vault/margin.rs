//! Margin arithmetic of a vault.

use primitive_types::U256;

use crate::math::{checked_mul, MathError};
use crate::risk::RISK_VARIABLE_UNIT;

/// `max(0, collateral_value - used_margin)`.
pub fn free_margin(collateral_value: U256, used_margin: U256) -> U256 {
    collateral_value.saturating_sub(used_margin)
}

/// `total_value × 100 < liquidation_threshold × open_debt`. Strict, so a
/// vault without debt is never liquidatable.
pub fn is_liquidatable(
    total_value: U256,
    liquidation_threshold: u16,
    open_debt: U256,
) -> Result<bool, MathError> {
    let scaled_value = checked_mul(total_value, U256::from(RISK_VARIABLE_UNIT))?;
    let required = checked_mul(U256::from(liquidation_threshold), open_debt)?;
    Ok(scaled_value < required)
}
