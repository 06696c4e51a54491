use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use primitive_types::U256;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{
    AssetValue, FungibleTokenStrategy, LedgerState, PositionSnapshot, PricingError,
    PricingStrategy, ValueInput,
};
use crate::math::liquidity::{amounts_for_liquidity, max_amounts_for_ticks, sqrt_price_x96_from_prices};
use crate::math::tick::{sqrt_ratio_at_tick, time_weighted_tick, MAX_TICK, MIN_TICK};
use crate::math::{checked_add, mul_div_down, to_u128, MathError, WAD};
use crate::models::{Address, AssetRef, BasketEntry};
use crate::risk::RiskVariables;
use crate::venue::{LiquidityVenue, PositionInfo};

/// Largest distance between a position bound and the average tick:
/// `1.0001^16095 ≈ 5`, so a range may span 0.2× to 5× the average price.
pub const DEFAULT_MAX_TICK_DISTANCE: i32 = 16_095;

const DEFAULT_TWAT_WINDOW: Duration = Duration::from_secs(300);

/// Liquidity positions valued by decomposition into their two underlying
/// tokens, each priced by the fungible strategy rather than by the pool.
pub struct ConcentratedLiquidityStrategy {
    venue: Arc<dyn LiquidityVenue>,
    tokens: Arc<FungibleTokenStrategy>,
    managers: RwLock<HashSet<Address>>,
    twat_window: Duration,
    max_tick_distance: i32,
}

impl ConcentratedLiquidityStrategy {
    pub const NAME: &'static str = "concentrated_liquidity";

    pub fn new(venue: Arc<dyn LiquidityVenue>, tokens: Arc<FungibleTokenStrategy>) -> Self {
        Self {
            venue,
            tokens,
            managers: RwLock::new(HashSet::new()),
            twat_window: DEFAULT_TWAT_WINDOW,
            max_tick_distance: DEFAULT_MAX_TICK_DISTANCE,
        }
    }

    pub fn with_twat_window(mut self, window: Duration) -> Self {
        self.twat_window = window;
        self
    }

    pub fn with_max_tick_distance(mut self, distance: i32) -> Self {
        self.max_tick_distance = distance;
        self
    }

    pub async fn add_position_manager(&self, manager: Address) -> Result<()> {
        let mut managers = self.managers.write().await;
        if !managers.insert(manager.clone()) {
            return Err(PricingError::DuplicateAsset(manager).into());
        }
        info!(manager = %manager, "position manager added");
        Ok(())
    }

    async fn is_manager(&self, asset: &Address) -> bool {
        self.managers.read().await.contains(asset)
    }

    async fn position(&self, manager: &Address, id: U256) -> Result<PositionInfo> {
        if !self.is_manager(manager).await {
            return Err(PricingError::UnknownAsset(manager.clone()).into());
        }
        self.venue
            .position(manager, id)
            .await
            .with_context(|| format!("Venue {} failed to read position {id}", self.venue.name()))?
            .ok_or_else(|| {
                PricingError::UnknownPosition {
                    asset: manager.clone(),
                    id,
                }
                .into()
            })
    }

    fn check_unit_amount(entry_asset: &Address, amount: U256) -> Result<()> {
        if amount != U256::one() {
            return Err(PricingError::InvalidAmount {
                asset: entry_asset.clone(),
                amount,
            }
            .into());
        }
        Ok(())
    }

    async fn average_tick(&self, position: &PositionInfo) -> Result<i32> {
        let pool = self
            .venue
            .pool_for(&position.token0, &position.token1, position.fee)
            .await?;
        let window = u32::try_from(self.twat_window.as_secs()).map_err(|_| MathError::Overflow)?;
        let cumulatives = self.venue.observe(&pool, &[window, 0]).await?;
        let [start, end] = cumulatives.as_slice() else {
            anyhow::bail!("Pool {pool} returned {} observations, expected 2", cumulatives.len());
        };
        Ok(time_weighted_tick(*start, *end, window)?)
    }

    async fn combined_risk(&self, position: &PositionInfo, base_currency: usize) -> Result<RiskVariables> {
        let risk0 = self.tokens.risk_variables(&position.token0, base_currency).await?;
        let risk1 = self.tokens.risk_variables(&position.token1, base_currency).await?;
        Ok(risk0.min(risk1))
    }
}

#[async_trait::async_trait]
impl PricingStrategy for ConcentratedLiquidityStrategy {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn assets(&self) -> Vec<Address> {
        let mut managers: Vec<Address> = self.managers.read().await.iter().cloned().collect();
        managers.sort();
        managers
    }

    async fn is_whitelisted(&self, ledger: &LedgerState, asset: &Address, id: U256) -> Result<bool> {
        if !self.is_manager(asset).await {
            return Ok(false);
        }
        let Some(position) = self.venue.position(asset, id).await? else {
            return Ok(false);
        };
        for token in [&position.token0, &position.token1] {
            if !self.tokens.contains(token).await || !ledger.exposure.is_allowed(token) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn get_value(&self, input: &ValueInput) -> Result<AssetValue> {
        Self::check_unit_amount(&input.asset, input.amount)?;
        let position = self.position(&input.asset, input.id).await?;

        // Trusted prices of 10^18 raw units; the pool's own spot price is never used.
        let price0 = self.tokens.usd_price_per_wad(&position.token0).await?;
        let price1 = self.tokens.usd_price_per_wad(&position.token1).await?;
        let sqrt_price = sqrt_price_x96_from_prices(price0, price1)?;

        let (amount0, amount1) = amounts_for_liquidity(
            sqrt_price,
            sqrt_ratio_at_tick(position.tick_lower)?,
            sqrt_ratio_at_tick(position.tick_upper)?,
            position.liquidity,
        )?;
        let value_in_usd = checked_add(
            mul_div_down(amount0, price0, WAD)?,
            mul_div_down(amount1, price1, WAD)?,
        )?;
        let risk = self.combined_risk(&position, input.base_currency).await?;
        debug!(
            manager = %input.asset,
            id = %input.id,
            amount0 = %amount0,
            amount1 = %amount1,
            value_in_usd = %value_in_usd,
            "liquidity position valued"
        );

        Ok(AssetValue {
            value_in_usd,
            value_in_base_currency: U256::zero(),
            collateral_factor: risk.collateral_factor,
            liquidation_threshold: risk.liquidation_threshold,
        })
    }

    async fn risk_variables(&self, asset: &Address, _base_currency: usize) -> Result<RiskVariables> {
        Err(PricingError::DerivedRiskVariables(asset.clone()).into())
    }

    async fn set_risk_variables(
        &self,
        asset: &Address,
        _base_currency: usize,
        _risk: RiskVariables,
    ) -> Result<()> {
        Err(PricingError::DerivedRiskVariables(asset.clone()).into())
    }

    async fn process_deposit(&self, ledger: &mut LedgerState, entry: &BasketEntry) -> Result<()> {
        Self::check_unit_amount(&entry.address, entry.amount)?;
        let key = entry.asset_ref();
        if ledger.positions.contains_key(&key) {
            return Err(PricingError::PositionAlreadyDeposited {
                asset: entry.address.clone(),
                id: entry.id,
            }
            .into());
        }

        let position = self.position(&entry.address, entry.id).await?;
        if position.liquidity == 0 {
            return Err(PricingError::ZeroLiquidity {
                asset: entry.address.clone(),
                id: entry.id,
            }
            .into());
        }
        for token in [&position.token0, &position.token1] {
            if !self.tokens.contains(token).await || !ledger.exposure.is_allowed(token) {
                return Err(PricingError::TokenNotAllowed(token.clone()).into());
            }
        }

        for tick in [position.tick_lower, position.tick_upper] {
            if !(MIN_TICK..=MAX_TICK).contains(&tick) {
                return Err(MathError::TickOutOfRange(tick).into());
            }
        }
        let average_tick = self.average_tick(&position).await?;
        let max_distance = i64::from(self.max_tick_distance);
        if i64::from(average_tick) - i64::from(position.tick_lower) > max_distance
            || i64::from(position.tick_upper) - i64::from(average_tick) > max_distance
        {
            warn!(
                manager = %entry.address,
                id = %entry.id,
                average_tick,
                tick_lower = position.tick_lower,
                tick_upper = position.tick_upper,
                "position range rejected"
            );
            return Err(PricingError::TickRangeTooWide {
                asset: entry.address.clone(),
                id: entry.id,
                average_tick,
                tick_lower: position.tick_lower,
                tick_upper: position.tick_upper,
            }
            .into());
        }

        let (max0, max1) =
            max_amounts_for_ticks(position.tick_lower, position.tick_upper, position.liquidity)?;
        let snapshot = PositionSnapshot {
            token0: position.token0.clone(),
            token1: position.token1.clone(),
            amount0: to_u128(max0)?,
            amount1: to_u128(max1)?,
        };
        ledger.exposure.increase(&snapshot.token0, snapshot.amount0)?;
        ledger.exposure.increase(&snapshot.token1, snapshot.amount1)?;
        debug!(
            manager = %entry.address,
            id = %entry.id,
            amount0 = snapshot.amount0,
            amount1 = snapshot.amount1,
            "position exposure reserved"
        );
        ledger.positions.insert(key, snapshot);
        Ok(())
    }

    async fn process_withdrawal(
        &self,
        ledger: &mut LedgerState,
        entry: &BasketEntry,
    ) -> Result<()> {
        let key = AssetRef::new(entry.address.clone(), entry.id);
        let snapshot = ledger.positions.remove(&key).ok_or_else(|| {
            PricingError::UnknownPosition {
                asset: entry.address.clone(),
                id: entry.id,
            }
        })?;
        ledger.exposure.decrease(&snapshot.token0, snapshot.amount0)?;
        ledger.exposure.decrease(&snapshot.token1, snapshot.amount1)?;
        Ok(())
    }
}
