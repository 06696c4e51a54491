//! Per-asset-class pricing strategies.
//!
//! Every whitelisted asset address is owned by exactly one strategy. A
//! strategy values asset instances, reports their risk variables and applies
//! deposit/withdrawal effects to the shared [`LedgerState`].

mod concentrated_liquidity;
mod floor_collection;
mod fungible;
mod risk_table;
mod semi_fungible;

pub use concentrated_liquidity::{ConcentratedLiquidityStrategy, DEFAULT_MAX_TICK_DISTANCE};
pub use floor_collection::{CollectionInfo, FloorCollectionStrategy};
pub use fungible::{FungibleAsset, FungibleTokenStrategy};
pub use risk_table::RiskTable;
pub use semi_fungible::{SemiFungibleAsset, SemiFungibleStrategy};

use std::collections::HashMap;

use anyhow::Result;
use primitive_types::U256;

use crate::exposure::ExposureLedger;
use crate::models::{Address, AssetRef, BasketEntry};
use crate::risk::RiskVariables;

/// One asset instance to value in a given unit of account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueInput {
    pub asset: Address,
    pub id: U256,
    pub amount: U256,
    pub base_currency: usize,
}

/// Result of valuing one asset instance. At most one of the two values is
/// non-zero: the strategy either priced the asset in USD (18 decimals) or
/// directly in the requested unit of account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetValue {
    pub value_in_usd: U256,
    pub value_in_base_currency: U256,
    pub collateral_factor: u16,
    pub liquidation_threshold: u16,
}

impl AssetValue {
    pub fn risk_variables(&self) -> RiskVariables {
        RiskVariables {
            collateral_factor: self.collateral_factor,
            liquidation_threshold: self.liquidation_threshold,
        }
    }
}

/// Exposure reserved by a deposited liquidity position, kept so that the
/// withdrawal releases exactly what the deposit took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionSnapshot {
    pub token0: Address,
    pub token1: Address,
    pub amount0: u128,
    pub amount1: u128,
}

/// Mutable registry state touched by deposits and withdrawals.
#[derive(Debug, Clone, Default)]
pub struct LedgerState {
    pub exposure: ExposureLedger,
    pub positions: HashMap<AssetRef, PositionSnapshot>,
}

impl LedgerState {
    /// Net difference between `self` and a working copy derived from it.
    pub fn change_to(&self, after: &LedgerState) -> LedgerChange {
        let exposure = after
            .exposure
            .iter()
            .filter_map(|(asset, exposure)| {
                let before = self.exposure.exposure(asset).current;
                (before != exposure.current).then(|| (asset.clone(), before, exposure.current))
            })
            .collect();
        let added_positions = after
            .positions
            .keys()
            .filter(|key| !self.positions.contains_key(*key))
            .cloned()
            .collect();
        let removed_positions = self
            .positions
            .iter()
            .filter(|(key, _)| !after.positions.contains_key(*key))
            .map(|(key, snapshot)| (key.clone(), snapshot.clone()))
            .collect();
        LedgerChange {
            exposure,
            added_positions,
            removed_positions,
        }
    }

    /// Undo a committed change without re-running any validation.
    pub fn revert(&mut self, change: &LedgerChange) {
        for (asset, before, after) in &change.exposure {
            self.exposure.revert(asset, *before, *after);
        }
        for key in &change.added_positions {
            self.positions.remove(key);
        }
        for (key, snapshot) in &change.removed_positions {
            self.positions.insert(key.clone(), snapshot.clone());
        }
    }
}

/// Effect of one committed deposit or withdrawal batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerChange {
    /// `(asset, exposure before, exposure after)`.
    exposure: Vec<(Address, u128, u128)>,
    added_positions: Vec<AssetRef>,
    removed_positions: Vec<(AssetRef, PositionSnapshot)>,
}

impl LedgerChange {
    pub fn is_empty(&self) -> bool {
        self.exposure.is_empty()
            && self.added_positions.is_empty()
            && self.removed_positions.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PricingError {
    #[error("Asset {0} is not known to this strategy")]
    UnknownAsset(Address),
    #[error("Asset {0} is already registered")]
    DuplicateAsset(Address),
    #[error("Id {id} of {asset} is not whitelisted")]
    IdNotWhitelisted { asset: Address, id: U256 },
    #[error("Invalid amount {amount} for {asset}")]
    InvalidAmount { asset: Address, amount: U256 },
    #[error("Position {id} of {asset} does not exist")]
    UnknownPosition { asset: Address, id: U256 },
    #[error("Position {id} of {asset} has no liquidity")]
    ZeroLiquidity { asset: Address, id: U256 },
    #[error("Position {id} of {asset} is already deposited")]
    PositionAlreadyDeposited { asset: Address, id: U256 },
    #[error("Underlying token {0} is not allowed as collateral")]
    TokenNotAllowed(Address),
    #[error(
        "Position {id} of {asset} spans ticks [{tick_lower}, {tick_upper}], too far from average tick {average_tick}"
    )]
    TickRangeTooWide {
        asset: Address,
        id: U256,
        average_tick: i32,
        tick_lower: i32,
        tick_upper: i32,
    },
    #[error("Risk variables of {0} are derived from its underlying tokens")]
    DerivedRiskVariables(Address),
}

/// Pricing capability of one asset class.
#[async_trait::async_trait]
pub trait PricingStrategy: Send + Sync {
    /// Unique strategy name, used for asset assignment.
    fn name(&self) -> &str;

    /// Asset addresses this strategy owns.
    async fn assets(&self) -> Vec<Address>;

    async fn is_whitelisted(&self, ledger: &LedgerState, asset: &Address, id: U256)
        -> Result<bool>;

    async fn get_value(&self, input: &ValueInput) -> Result<AssetValue>;

    async fn risk_variables(&self, asset: &Address, base_currency: usize) -> Result<RiskVariables>;

    async fn set_risk_variables(
        &self,
        asset: &Address,
        base_currency: usize,
        risk: RiskVariables,
    ) -> Result<()>;

    /// Validate a deposit and apply its exposure effects to `ledger`.
    async fn process_deposit(&self, ledger: &mut LedgerState, entry: &BasketEntry) -> Result<()>;

    async fn process_withdrawal(&self, ledger: &mut LedgerState, entry: &BasketEntry)
        -> Result<()>;
}
