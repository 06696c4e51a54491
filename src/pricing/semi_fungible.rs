use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use primitive_types::U256;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{AssetValue, LedgerState, PricingError, PricingStrategy, RiskTable, ValueInput};
use crate::math::{mul_div_down, to_u128};
use crate::models::{Address, BasketEntry, FeedId};
use crate::oracle::OracleHub;
use crate::risk::RiskVariables;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemiFungibleAsset {
    pub label: String,
    /// The single id of the contract that is accepted.
    pub id: U256,
    pub oracles: Vec<FeedId>,
    pub asset_unit: U256,
}

/// Per-id balances of multi-token contracts. Each contract is whitelisted for
/// exactly one id, priced like a fungible token.
pub struct SemiFungibleStrategy {
    oracles: Arc<OracleHub>,
    assets: RwLock<HashMap<Address, SemiFungibleAsset>>,
    risk: RiskTable,
}

impl SemiFungibleStrategy {
    pub const NAME: &'static str = "semi_fungible";

    pub fn new(oracles: Arc<OracleHub>) -> Self {
        Self {
            oracles,
            assets: RwLock::new(HashMap::new()),
            risk: RiskTable::default(),
        }
    }

    pub fn with_default_risk(mut self, risk: RiskVariables) -> Self {
        self.risk = RiskTable::new(risk);
        self
    }

    pub async fn add_asset(&self, address: Address, asset: SemiFungibleAsset) -> Result<()> {
        if asset.asset_unit.is_zero() {
            anyhow::bail!("Semi-fungible asset {} has a zero unit", asset.label);
        }
        self.oracles
            .check_oracle_sequence(&asset.oracles, &asset.label)
            .await
            .with_context(|| format!("Invalid oracle chain for {}", asset.label))?;

        let mut assets = self.assets.write().await;
        if assets.contains_key(&address) {
            return Err(PricingError::DuplicateAsset(address).into());
        }
        info!(asset = %address, id = %asset.id, label = %asset.label, "semi-fungible asset added");
        assets.insert(address, asset);
        Ok(())
    }

    async fn checked_asset(&self, asset: &Address, id: U256) -> Result<SemiFungibleAsset> {
        let info = self
            .assets
            .read()
            .await
            .get(asset)
            .cloned()
            .ok_or_else(|| PricingError::UnknownAsset(asset.clone()))?;
        if info.id != id {
            return Err(PricingError::IdNotWhitelisted {
                asset: asset.clone(),
                id,
            }
            .into());
        }
        Ok(info)
    }

    async fn contains(&self, asset: &Address) -> Result<()> {
        if self.assets.read().await.contains_key(asset) {
            Ok(())
        } else {
            Err(PricingError::UnknownAsset(asset.clone()).into())
        }
    }
}

#[async_trait::async_trait]
impl PricingStrategy for SemiFungibleStrategy {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn assets(&self) -> Vec<Address> {
        let mut assets: Vec<Address> = self.assets.read().await.keys().cloned().collect();
        assets.sort();
        assets
    }

    async fn is_whitelisted(
        &self,
        _ledger: &LedgerState,
        asset: &Address,
        id: U256,
    ) -> Result<bool> {
        Ok(self
            .assets
            .read()
            .await
            .get(asset)
            .is_some_and(|info| info.id == id))
    }

    async fn get_value(&self, input: &ValueInput) -> Result<AssetValue> {
        let info = self.checked_asset(&input.asset, input.id).await?;
        let rate = self
            .oracles
            .get_rate(&info.oracles, input.base_currency)
            .await
            .with_context(|| format!("Failed to price {}", info.label))?;

        let value_in_usd = mul_div_down(input.amount, rate.in_usd, info.asset_unit)?;
        let value_in_base_currency =
            mul_div_down(input.amount, rate.in_base_currency, info.asset_unit)?;
        let risk = self.risk.get(&input.asset, input.base_currency).await;
        debug!(asset = %input.asset, id = %input.id, amount = %input.amount, "semi-fungible asset valued");

        Ok(AssetValue {
            value_in_usd,
            value_in_base_currency,
            collateral_factor: risk.collateral_factor,
            liquidation_threshold: risk.liquidation_threshold,
        })
    }

    async fn risk_variables(&self, asset: &Address, base_currency: usize) -> Result<RiskVariables> {
        self.contains(asset).await?;
        Ok(self.risk.get(asset, base_currency).await)
    }

    async fn set_risk_variables(
        &self,
        asset: &Address,
        base_currency: usize,
        risk: RiskVariables,
    ) -> Result<()> {
        self.contains(asset).await?;
        self.risk.set(asset, base_currency, risk).await;
        Ok(())
    }

    async fn process_deposit(&self, ledger: &mut LedgerState, entry: &BasketEntry) -> Result<()> {
        self.checked_asset(&entry.address, entry.id).await?;
        ledger.exposure.increase(&entry.address, to_u128(entry.amount)?)?;
        Ok(())
    }

    async fn process_withdrawal(
        &self,
        ledger: &mut LedgerState,
        entry: &BasketEntry,
    ) -> Result<()> {
        self.checked_asset(&entry.address, entry.id).await?;
        ledger.exposure.decrease(&entry.address, to_u128(entry.amount)?)?;
        Ok(())
    }
}
