//! Central asset directory and basket valuation.
//!
//! Maps every whitelisted asset address to the one pricing strategy that owns
//! it, keeps the units of account, and funnels all deposit/withdrawal effects
//! through a single locked [`LedgerState`].

mod builder;

pub use builder::RegistryBuilder;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use primitive_types::U256;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::collaborators::VaultFactory;
use crate::exposure::Exposure;
use crate::math::{checked_add, checked_mul, mul_div_down, unit_for_decimals, MathError};
use crate::models::{split_basket, Address, BaseCurrency, BasketEntry, FeedId};
use crate::oracle::{OracleError, OracleHub};
use crate::pricing::{LedgerChange, LedgerState, PricingStrategy, ValueInput};
use crate::risk::{self, RiskVariables, ValueAndRisk};

/// Decimals of internal USD values.
const INTERNAL_DECIMALS: u8 = 18;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Base currency {0} does not exist")]
    UnknownBaseCurrency(usize),
    #[error("Base currency {0} does not exist")]
    UnknownBaseCurrencyLabel(String),
    #[error("Base currency {0} is already registered")]
    DuplicateBaseCurrency(String),
    #[error("Base currency {label} has {decimals} decimals, at most 18 are supported")]
    TooManyDecimals { label: String, decimals: u8 },
    #[error("Strategy {0} is not registered")]
    UnknownStrategy(String),
    #[error("Strategy {0} is already registered")]
    DuplicateStrategy(String),
    #[error("Asset {asset} is already assigned to strategy {strategy}")]
    AssetAlreadyAssigned { asset: Address, strategy: String },
    #[error("Asset {asset} is not owned by strategy {strategy}")]
    AssetNotInStrategy { asset: Address, strategy: String },
    #[error("Asset {0} is not registered")]
    UnknownAsset(Address),
    #[error("Length mismatch: {assets} assets, {ids} ids, {amounts} amounts")]
    LengthMismatch {
        assets: usize,
        ids: usize,
        amounts: usize,
    },
    #[error("Caller {0} is not a registered vault")]
    NotAVault(Address),
}

/// A unit of account to register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseCurrencyConfig {
    pub label: String,
    pub decimals: u8,
    pub native_asset: Option<Address>,
    /// Feed quoting one unit of the currency in USD; must be registered with
    /// the oracle hub.
    pub to_usd_feed: FeedId,
}

/// Everything a vault needs from one valuation round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasketValuation {
    pub values: Vec<ValueAndRisk>,
    pub total_value: U256,
    pub collateral_value: U256,
    /// Value-weighted factors; None for a valueless basket.
    pub thresholds: Option<RiskVariables>,
}

pub struct AssetRegistry {
    oracles: Arc<OracleHub>,
    factory: Arc<dyn VaultFactory>,
    base_currencies: RwLock<Vec<BaseCurrency>>,
    strategies: RwLock<HashMap<String, Arc<dyn PricingStrategy>>>,
    assets: RwLock<HashMap<Address, String>>,
    ledger: Mutex<LedgerState>,
}

impl std::fmt::Debug for AssetRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetRegistry").finish_non_exhaustive()
    }
}

impl AssetRegistry {
    pub fn new(oracles: Arc<OracleHub>, factory: Arc<dyn VaultFactory>) -> Self {
        Self {
            oracles,
            factory,
            base_currencies: RwLock::new(vec![BaseCurrency::usd()]),
            strategies: RwLock::new(HashMap::new()),
            assets: RwLock::new(HashMap::new()),
            ledger: Mutex::new(LedgerState::default()),
        }
    }

    pub fn oracles(&self) -> &Arc<OracleHub> {
        &self.oracles
    }

    // ---- configuration ----

    /// Register a unit of account and return its index.
    pub async fn add_base_currency(&self, config: BaseCurrencyConfig) -> Result<usize> {
        if config.decimals > INTERNAL_DECIMALS {
            return Err(RegistryError::TooManyDecimals {
                label: config.label,
                decimals: config.decimals,
            }
            .into());
        }
        let oracle = self
            .oracles
            .oracle(&config.to_usd_feed)
            .await
            .ok_or_else(|| OracleError::UnknownOracle(config.to_usd_feed.clone()))
            .with_context(|| format!("Base currency {} needs a USD feed", config.label))?;
        let unit_correction = unit_for_decimals(INTERNAL_DECIMALS - config.decimals)?;

        let mut base_currencies = self.base_currencies.write().await;
        let duplicate = base_currencies.iter().any(|existing| {
            existing.label.eq_ignore_ascii_case(&config.label)
                || (config.native_asset.is_some() && existing.native_asset == config.native_asset)
        });
        if duplicate {
            return Err(RegistryError::DuplicateBaseCurrency(config.label).into());
        }

        let index = base_currencies.len();
        info!(index, label = %config.label, feed = %config.to_usd_feed, "base currency added");
        base_currencies.push(BaseCurrency {
            index,
            label: config.label,
            decimals: config.decimals,
            native_asset: config.native_asset,
            to_usd_feed: Some(config.to_usd_feed),
            to_usd_oracle_unit: oracle.oracle_unit,
            unit_correction,
        });
        Ok(index)
    }

    pub async fn base_currency(&self, index: usize) -> Result<BaseCurrency> {
        self.base_currencies
            .read()
            .await
            .get(index)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownBaseCurrency(index).into())
    }

    pub async fn base_currency_index(&self, label: &str) -> Result<usize> {
        self.base_currencies
            .read()
            .await
            .iter()
            .find(|bc| bc.label.eq_ignore_ascii_case(label))
            .map(|bc| bc.index)
            .ok_or_else(|| RegistryError::UnknownBaseCurrencyLabel(label.to_string()).into())
    }

    pub async fn base_currencies(&self) -> Vec<BaseCurrency> {
        self.base_currencies.read().await.clone()
    }

    pub async fn add_strategy(&self, strategy: Arc<dyn PricingStrategy>) -> Result<()> {
        let mut strategies = self.strategies.write().await;
        let name = strategy.name().to_string();
        if strategies.contains_key(&name) {
            return Err(RegistryError::DuplicateStrategy(name).into());
        }
        info!(strategy = %name, "pricing strategy added");
        strategies.insert(name, strategy);
        Ok(())
    }

    /// Hand ownership of `asset` to the named strategy. An asset is owned by
    /// at most one strategy for the lifetime of the registry.
    pub async fn assign_asset(&self, asset: &Address, strategy_name: &str) -> Result<()> {
        let strategy = self
            .strategies
            .read()
            .await
            .get(strategy_name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownStrategy(strategy_name.to_string()))?;
        if !strategy.assets().await.contains(asset) {
            return Err(RegistryError::AssetNotInStrategy {
                asset: asset.clone(),
                strategy: strategy_name.to_string(),
            }
            .into());
        }

        let mut assets = self.assets.write().await;
        if let Some(existing) = assets.get(asset) {
            return Err(RegistryError::AssetAlreadyAssigned {
                asset: asset.clone(),
                strategy: existing.clone(),
            }
            .into());
        }
        debug!(asset = %asset, strategy = strategy_name, "asset assigned");
        assets.insert(asset.clone(), strategy_name.to_string());
        Ok(())
    }

    /// Assign every asset the named strategy currently owns.
    pub async fn assign_strategy_assets(&self, strategy_name: &str) -> Result<()> {
        let strategy = self
            .strategies
            .read()
            .await
            .get(strategy_name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownStrategy(strategy_name.to_string()))?;
        let assigned: Vec<Address> = self.assets.read().await.keys().cloned().collect();
        for asset in strategy.assets().await {
            if !assigned.contains(&asset) {
                self.assign_asset(&asset, strategy_name).await?;
            }
        }
        Ok(())
    }

    pub async fn set_risk_variables(
        &self,
        asset: &Address,
        base_currency: usize,
        collateral_factor: u16,
        liquidation_threshold: u16,
    ) -> Result<()> {
        self.base_currency(base_currency).await?;
        let risk = RiskVariables::new(collateral_factor, liquidation_threshold)?;
        let strategy = self.strategy_for(asset).await?;
        strategy
            .set_risk_variables(asset, base_currency, risk)
            .await?;
        info!(asset = %asset, base_currency, collateral_factor, liquidation_threshold, "risk variables set");
        Ok(())
    }

    pub async fn risk_variables(&self, asset: &Address, base_currency: usize) -> Result<RiskVariables> {
        self.base_currency(base_currency).await?;
        self.strategy_for(asset)
            .await?
            .risk_variables(asset, base_currency)
            .await
    }

    /// Set the protocol-wide cap of an underlying asset.
    pub async fn set_max_exposure(&self, asset: &Address, max: u128) {
        self.ledger.lock().await.exposure.set_max(asset, max);
    }

    pub async fn exposure(&self, asset: &Address) -> Exposure {
        self.ledger.lock().await.exposure.exposure(asset)
    }

    // ---- whitelisting ----

    async fn strategy_for(&self, asset: &Address) -> Result<Arc<dyn PricingStrategy>> {
        let name = self
            .assets
            .read()
            .await
            .get(asset)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownAsset(asset.clone()))?;
        self.strategies
            .read()
            .await
            .get(&name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownStrategy(name).into())
    }

    async fn try_strategy_for(&self, asset: &Address) -> Option<Arc<dyn PricingStrategy>> {
        self.strategy_for(asset).await.ok()
    }

    pub async fn is_whitelisted(&self, asset: &Address, id: U256) -> Result<bool> {
        let Some(strategy) = self.try_strategy_for(asset).await else {
            return Ok(false);
        };
        let ledger = self.ledger.lock().await;
        strategy.is_whitelisted(&ledger, asset, id).await
    }

    pub async fn batch_is_whitelisted(&self, assets: &[Address], ids: &[U256]) -> Result<bool> {
        if assets.len() != ids.len() {
            return Err(RegistryError::LengthMismatch {
                assets: assets.len(),
                ids: ids.len(),
                amounts: ids.len(),
            }
            .into());
        }
        for (asset, id) in assets.iter().zip(ids) {
            if !self.is_whitelisted(asset, *id).await? {
                debug!(asset = %asset, id = %id, "asset not whitelisted");
                return Ok(false);
            }
        }
        Ok(true)
    }

    // ---- valuation ----

    /// Value every basket line in the unit of account `base_currency`.
    ///
    /// Unknown assets, an unknown unit of account or mismatched list lengths
    /// fail the whole call; no partial valuation is ever returned.
    pub async fn list_of_values_per_asset(
        &self,
        assets: &[Address],
        ids: &[U256],
        amounts: &[U256],
        base_currency: usize,
    ) -> Result<Vec<ValueAndRisk>> {
        if assets.len() != ids.len() || assets.len() != amounts.len() {
            return Err(RegistryError::LengthMismatch {
                assets: assets.len(),
                ids: ids.len(),
                amounts: amounts.len(),
            }
            .into());
        }
        let target = self.base_currency(base_currency).await?;
        let mut usd_rate: Option<U256> = None;
        let mut values = Vec::with_capacity(assets.len());

        for ((asset, id), amount) in assets.iter().zip(ids).zip(amounts) {
            let strategy = self.strategy_for(asset).await?;

            if target.native_asset.as_ref() == Some(asset) {
                let risk = strategy.risk_variables(asset, base_currency).await?;
                values.push(ValueAndRisk::new(*amount, risk));
                continue;
            }

            let input = ValueInput {
                asset: asset.clone(),
                id: *id,
                amount: *amount,
                base_currency,
            };
            let value = strategy
                .get_value(&input)
                .await
                .with_context(|| format!("Failed to value {asset} #{id}"))?;

            let mut converted = value.value_in_base_currency / target.unit_correction;
            if !value.value_in_usd.is_zero() {
                let in_target = if target.is_usd() {
                    value.value_in_usd
                } else {
                    let rate = match usd_rate {
                        Some(rate) => rate,
                        None => {
                            let rate = self.usd_rate(&target).await?;
                            usd_rate = Some(rate);
                            rate
                        }
                    };
                    mul_div_down(
                        value.value_in_usd,
                        target.to_usd_oracle_unit,
                        checked_mul(rate, target.unit_correction)?,
                    )?
                };
                converted = checked_add(converted, in_target)?;
            }
            values.push(ValueAndRisk::new(converted, value.risk_variables()));
        }
        Ok(values)
    }

    async fn usd_rate(&self, target: &BaseCurrency) -> Result<U256> {
        let feed = target
            .to_usd_feed
            .as_ref()
            .ok_or(RegistryError::UnknownBaseCurrency(target.index))?;
        let rate = self
            .oracles
            .latest_rate(feed)
            .await
            .with_context(|| format!("Failed to convert USD into {}", target.label))?;
        if rate.is_zero() {
            warn!(base_currency = %target.label, "base currency has a zero USD rate");
            return Err(MathError::DivideByZero.into());
        }
        Ok(rate)
    }

    pub async fn total_value(
        &self,
        assets: &[Address],
        ids: &[U256],
        amounts: &[U256],
        base_currency: usize,
    ) -> Result<U256> {
        let values = self
            .list_of_values_per_asset(assets, ids, amounts, base_currency)
            .await?;
        Ok(risk::total_value(&values)?)
    }

    pub async fn collateral_value(
        &self,
        assets: &[Address],
        ids: &[U256],
        amounts: &[U256],
        base_currency: usize,
    ) -> Result<U256> {
        let values = self
            .list_of_values_per_asset(assets, ids, amounts, base_currency)
            .await?;
        Ok(risk::weighted_collateral_value(&values)?)
    }

    /// Value-weighted liquidation threshold. Fails for a valueless basket.
    pub async fn liquidation_threshold(
        &self,
        assets: &[Address],
        ids: &[U256],
        amounts: &[U256],
        base_currency: usize,
    ) -> Result<u16> {
        let values = self
            .list_of_values_per_asset(assets, ids, amounts, base_currency)
            .await?;
        Ok(risk::weighted_liquidation_threshold(&values)?)
    }

    /// Value-weighted collateral factor and liquidation threshold. Fails for
    /// a valueless basket.
    pub async fn margin_thresholds(
        &self,
        assets: &[Address],
        ids: &[U256],
        amounts: &[U256],
        base_currency: usize,
    ) -> Result<RiskVariables> {
        let values = self
            .list_of_values_per_asset(assets, ids, amounts, base_currency)
            .await?;
        Ok(RiskVariables {
            collateral_factor: risk::weighted_collateral_factor(&values)?,
            liquidation_threshold: risk::weighted_liquidation_threshold(&values)?,
        })
    }

    /// Total, collateral value and thresholds of a basket from a single
    /// valuation round.
    pub async fn value_basket(
        &self,
        entries: &[BasketEntry],
        base_currency: usize,
    ) -> Result<BasketValuation> {
        let (assets, ids, amounts) = split_basket(entries);
        let values = self
            .list_of_values_per_asset(&assets, &ids, &amounts, base_currency)
            .await?;
        let total_value = risk::total_value(&values)?;
        let collateral_value = risk::weighted_collateral_value(&values)?;
        let thresholds = if total_value.is_zero() {
            None
        } else {
            Some(RiskVariables {
                collateral_factor: risk::weighted_collateral_factor(&values)?,
                liquidation_threshold: risk::weighted_liquidation_threshold(&values)?,
            })
        };
        Ok(BasketValuation {
            values,
            total_value,
            collateral_value,
            thresholds,
        })
    }

    // ---- deposit / withdrawal processing ----

    async fn require_vault(&self, caller: &Address) -> Result<()> {
        let registered = self
            .factory
            .is_registered_vault(caller)
            .await
            .context("Failed to query vault factory")?;
        if !registered {
            warn!(caller = %caller, "batch processing rejected");
            return Err(RegistryError::NotAVault(caller.clone()).into());
        }
        Ok(())
    }

    /// Apply the deposit effects of every entry, or none of them. The
    /// returned change undoes the batch through [`Self::revert_batch`].
    pub async fn batch_process_deposit(
        &self,
        caller: &Address,
        entries: &[BasketEntry],
    ) -> Result<LedgerChange> {
        self.require_vault(caller).await?;
        let mut ledger = self.ledger.lock().await;
        let mut working = ledger.clone();
        for entry in entries {
            let strategy = self.strategy_for(&entry.address).await?;
            strategy
                .process_deposit(&mut working, entry)
                .await
                .with_context(|| format!("Deposit of {} #{} rejected", entry.address, entry.id))?;
        }
        let change = ledger.change_to(&working);
        *ledger = working;
        info!(vault = %caller, entries = entries.len(), "deposit batch processed");
        Ok(change)
    }

    /// Reverse the exposure effects of every entry, or none of them.
    pub async fn batch_process_withdrawal(
        &self,
        caller: &Address,
        entries: &[BasketEntry],
    ) -> Result<LedgerChange> {
        self.require_vault(caller).await?;
        let mut ledger = self.ledger.lock().await;
        let mut working = ledger.clone();
        for entry in entries {
            let strategy = self.strategy_for(&entry.address).await?;
            strategy
                .process_withdrawal(&mut working, entry)
                .await
                .with_context(|| format!("Withdrawal of {} #{} rejected", entry.address, entry.id))?;
        }
        let change = ledger.change_to(&working);
        *ledger = working;
        info!(vault = %caller, entries = entries.len(), "withdrawal batch processed");
        Ok(change)
    }

    /// Undo a batch committed for `caller`. Caps and position checks are not
    /// re-applied, so the ledger returns exactly to its earlier holdings.
    pub async fn revert_batch(&self, caller: &Address, change: &LedgerChange) {
        self.ledger.lock().await.revert(change);
        info!(vault = %caller, "batch reverted");
    }
}
