//! Basket risk aggregation.
//!
//! Pure functions over per-asset `(value, collateral factor, liquidation
//! threshold)` triples. Factors are percentages (100 = 100%).

use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::math::{checked_add, checked_mul, MathError};

/// Scale of collateral factors and liquidation thresholds.
pub const RISK_VARIABLE_UNIT: u16 = 100;
pub const MAX_COLLATERAL_FACTOR: u16 = 100;
pub const MAX_LIQUIDATION_THRESHOLD: u16 = 10_000;

pub const DEFAULT_COLLATERAL_FACTOR: u16 = 20;
pub const DEFAULT_LIQUIDATION_THRESHOLD: u16 = 110;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RiskError {
    #[error("Total basket value is zero; weighted threshold is undefined")]
    DivideByZero,
    #[error("Collateral factor {0} exceeds 100")]
    CollateralFactorOutOfRange(u16),
    #[error("Liquidation threshold {0} exceeds 10000")]
    LiquidationThresholdOutOfRange(u16),
    #[error(transparent)]
    Math(#[from] MathError),
}

/// Risk parameters of one asset for one unit of account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskVariables {
    pub collateral_factor: u16,
    pub liquidation_threshold: u16,
}

impl RiskVariables {
    pub fn new(collateral_factor: u16, liquidation_threshold: u16) -> Result<Self, RiskError> {
        if collateral_factor > MAX_COLLATERAL_FACTOR {
            return Err(RiskError::CollateralFactorOutOfRange(collateral_factor));
        }
        if liquidation_threshold > MAX_LIQUIDATION_THRESHOLD {
            return Err(RiskError::LiquidationThresholdOutOfRange(
                liquidation_threshold,
            ));
        }
        Ok(Self {
            collateral_factor,
            liquidation_threshold,
        })
    }

    /// Element-wise minimum: a composite asset is only as safe as its weakest
    /// component.
    pub fn min(self, other: Self) -> Self {
        Self {
            collateral_factor: self.collateral_factor.min(other.collateral_factor),
            liquidation_threshold: self.liquidation_threshold.min(other.liquidation_threshold),
        }
    }
}

impl Default for RiskVariables {
    fn default() -> Self {
        Self {
            collateral_factor: DEFAULT_COLLATERAL_FACTOR,
            liquidation_threshold: DEFAULT_LIQUIDATION_THRESHOLD,
        }
    }
}

/// One basket line after valuation, in the unit of account's precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueAndRisk {
    pub value: U256,
    pub collateral_factor: u16,
    pub liquidation_threshold: u16,
}

impl ValueAndRisk {
    pub fn new(value: U256, risk: RiskVariables) -> Self {
        Self {
            value,
            collateral_factor: risk.collateral_factor,
            liquidation_threshold: risk.liquidation_threshold,
        }
    }
}

pub fn total_value(values: &[ValueAndRisk]) -> Result<U256, RiskError> {
    values
        .iter()
        .try_fold(U256::zero(), |acc, v| checked_add(acc, v.value))
        .map_err(RiskError::from)
}

/// `floor(Σ value_i × collateral_factor_i / 100)`.
pub fn weighted_collateral_value(values: &[ValueAndRisk]) -> Result<U256, RiskError> {
    let mut weighted = U256::zero();
    for v in values {
        let term = checked_mul(v.value, U256::from(v.collateral_factor))?;
        weighted = checked_add(weighted, term)?;
    }
    Ok(weighted / U256::from(RISK_VARIABLE_UNIT))
}

/// `floor(Σ value_i × liquidation_threshold_i / Σ value_i)`.
///
/// Fails with [`RiskError::DivideByZero`] for a valueless basket; callers
/// must handle that case before asking.
pub fn weighted_liquidation_threshold(values: &[ValueAndRisk]) -> Result<u16, RiskError> {
    weighted_average(values, |v| v.liquidation_threshold)
}

/// Value-weighted mean collateral factor. Same zero-value rule as
/// [`weighted_liquidation_threshold`].
pub fn weighted_collateral_factor(values: &[ValueAndRisk]) -> Result<u16, RiskError> {
    weighted_average(values, |v| v.collateral_factor)
}

fn weighted_average(
    values: &[ValueAndRisk],
    factor: impl Fn(&ValueAndRisk) -> u16,
) -> Result<u16, RiskError> {
    let mut total = U256::zero();
    let mut weighted = U256::zero();
    for v in values {
        total = checked_add(total, v.value)?;
        weighted = checked_add(weighted, checked_mul(v.value, U256::from(factor(v)))?)?;
    }
    if total.is_zero() {
        return Err(RiskError::DivideByZero);
    }
    // A weighted mean never exceeds the largest factor, which is a u16.
    Ok((weighted / total).low_u32() as u16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::WAD;

    fn line(value: u64, cf: u16, lt: u16) -> ValueAndRisk {
        ValueAndRisk {
            value: U256::from(value),
            collateral_factor: cf,
            liquidation_threshold: lt,
        }
    }

    #[test]
    fn collateral_value_floors_once() {
        let values = [line(333, 50, 110), line(1, 50, 110)];
        // (16650 + 50) / 100 = 167
        assert_eq!(weighted_collateral_value(&values).unwrap(), U256::from(167u64));
    }

    #[test]
    fn collateral_value_of_mixed_basket() {
        let values = [
            ValueAndRisk {
                value: U256::from(3_000u64) * WAD,
                collateral_factor: 80,
                liquidation_threshold: 110,
            },
            ValueAndRisk {
                value: U256::from(50_000u64) * WAD,
                collateral_factor: 20,
                liquidation_threshold: 110,
            },
        ];
        assert_eq!(
            weighted_collateral_value(&values).unwrap(),
            U256::from(12_400u64) * WAD
        );
    }

    #[test]
    fn collateral_value_is_monotonic() {
        let base = [line(1_000, 40, 110), line(500, 60, 120)];
        let more_value = [line(1_001, 40, 110), line(500, 60, 120)];
        let more_factor = [line(1_000, 41, 110), line(500, 60, 120)];
        let reference = weighted_collateral_value(&base).unwrap();
        assert!(weighted_collateral_value(&more_value).unwrap() >= reference);
        assert!(weighted_collateral_value(&more_factor).unwrap() >= reference);
    }

    #[test]
    fn liquidation_threshold_is_value_weighted() {
        let values = [line(100, 50, 110), line(300, 50, 150)];
        // (11000 + 45000) / 400 = 140
        assert_eq!(weighted_liquidation_threshold(&values).unwrap(), 140);
    }

    #[test]
    fn liquidation_threshold_of_valueless_basket_is_an_error() {
        assert_eq!(
            weighted_liquidation_threshold(&[]).unwrap_err(),
            RiskError::DivideByZero
        );
        assert_eq!(
            weighted_liquidation_threshold(&[line(0, 50, 110)]).unwrap_err(),
            RiskError::DivideByZero
        );
    }

    #[test]
    fn risk_variables_are_range_checked() {
        assert!(RiskVariables::new(100, 10_000).is_ok());
        assert_eq!(
            RiskVariables::new(101, 110).unwrap_err(),
            RiskError::CollateralFactorOutOfRange(101)
        );
        assert_eq!(
            RiskVariables::new(50, 10_001).unwrap_err(),
            RiskError::LiquidationThresholdOutOfRange(10_001)
        );
    }

    #[test]
    fn min_takes_the_weaker_side() {
        let a = RiskVariables::new(80, 110).unwrap();
        let b = RiskVariables::new(60, 150).unwrap();
        assert_eq!(a.min(b), RiskVariables::new(60, 110).unwrap());
    }
}
