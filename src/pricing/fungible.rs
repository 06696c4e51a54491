use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use primitive_types::U256;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{AssetValue, LedgerState, PricingError, PricingStrategy, RiskTable, ValueInput};
use crate::math::{checked_add, mul_div_down, to_u128, unit_for_decimals, WAD};
use crate::models::{Address, BasketEntry, FeedId, USD_INDEX};
use crate::oracle::OracleHub;
use crate::risk::RiskVariables;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FungibleAsset {
    pub label: String,
    pub oracles: Vec<FeedId>,
    /// `10^decimals` of the token.
    pub asset_unit: U256,
}

/// Plain tokens priced by an oracle chain and scaled by their own decimals.
pub struct FungibleTokenStrategy {
    oracles: Arc<OracleHub>,
    assets: RwLock<HashMap<Address, FungibleAsset>>,
    risk: RiskTable,
}

impl FungibleTokenStrategy {
    pub const NAME: &'static str = "fungible";

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

    pub async fn add_asset(
        &self,
        address: Address,
        label: &str,
        decimals: u8,
        oracles: Vec<FeedId>,
    ) -> Result<()> {
        self.oracles
            .check_oracle_sequence(&oracles, label)
            .await
            .with_context(|| format!("Invalid oracle chain for {label}"))?;
        let asset_unit = unit_for_decimals(decimals)?;

        let mut assets = self.assets.write().await;
        if assets.contains_key(&address) {
            return Err(PricingError::DuplicateAsset(address).into());
        }
        info!(asset = %address, label, decimals, hops = oracles.len(), "fungible asset added");
        assets.insert(
            address,
            FungibleAsset {
                label: label.to_string(),
                oracles,
                asset_unit,
            },
        );
        Ok(())
    }

    pub async fn contains(&self, asset: &Address) -> bool {
        self.assets.read().await.contains_key(asset)
    }

    async fn asset(&self, asset: &Address) -> Result<FungibleAsset> {
        self.assets
            .read()
            .await
            .get(asset)
            .cloned()
            .ok_or_else(|| PricingError::UnknownAsset(asset.clone()).into())
    }

    /// USD value of 10^18 raw units of `asset`, 18 decimals.
    pub async fn usd_price_per_wad(&self, asset: &Address) -> Result<U256> {
        let value = self
            .get_value(&ValueInput {
                asset: asset.clone(),
                id: U256::zero(),
                amount: WAD,
                base_currency: USD_INDEX,
            })
            .await?;
        // For USD the hub may resolve the rate on either side.
        Ok(checked_add(value.value_in_usd, value.value_in_base_currency)?)
    }
}

#[async_trait::async_trait]
impl PricingStrategy for FungibleTokenStrategy {
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
        _id: U256,
    ) -> Result<bool> {
        Ok(self.contains(asset).await)
    }

    async fn get_value(&self, input: &ValueInput) -> Result<AssetValue> {
        let info = self.asset(&input.asset).await?;
        let rate = self
            .oracles
            .get_rate(&info.oracles, input.base_currency)
            .await
            .with_context(|| format!("Failed to price {}", info.label))?;

        let value_in_usd = mul_div_down(input.amount, rate.in_usd, info.asset_unit)?;
        let value_in_base_currency =
            mul_div_down(input.amount, rate.in_base_currency, info.asset_unit)?;
        let risk = self.risk.get(&input.asset, input.base_currency).await;
        debug!(
            asset = %input.asset,
            amount = %input.amount,
            value_in_usd = %value_in_usd,
            value_in_base_currency = %value_in_base_currency,
            "fungible asset valued"
        );

        Ok(AssetValue {
            value_in_usd,
            value_in_base_currency,
            collateral_factor: risk.collateral_factor,
            liquidation_threshold: risk.liquidation_threshold,
        })
    }

    async fn risk_variables(&self, asset: &Address, base_currency: usize) -> Result<RiskVariables> {
        if !self.contains(asset).await {
            return Err(PricingError::UnknownAsset(asset.clone()).into());
        }
        Ok(self.risk.get(asset, base_currency).await)
    }

    async fn set_risk_variables(
        &self,
        asset: &Address,
        base_currency: usize,
        risk: RiskVariables,
    ) -> Result<()> {
        if !self.contains(asset).await {
            return Err(PricingError::UnknownAsset(asset.clone()).into());
        }
        self.risk.set(asset, base_currency, risk).await;
        Ok(())
    }

    async fn process_deposit(&self, ledger: &mut LedgerState, entry: &BasketEntry) -> Result<()> {
        if !self.contains(&entry.address).await {
            return Err(PricingError::UnknownAsset(entry.address.clone()).into());
        }
        let amount = to_u128(entry.amount)?;
        ledger.exposure.increase(&entry.address, amount)?;
        Ok(())
    }

    async fn process_withdrawal(
        &self,
        ledger: &mut LedgerState,
        entry: &BasketEntry,
    ) -> Result<()> {
        if !self.contains(&entry.address).await {
            return Err(PricingError::UnknownAsset(entry.address.clone()).into());
        }
        let amount = to_u128(entry.amount)?;
        ledger.exposure.decrease(&entry.address, amount)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exposure::ExposureError;
    use crate::oracle::{MemoryPriceFeed, OracleInfo};

    async fn strategy() -> Result<FungibleTokenStrategy> {
        let feed = Arc::new(MemoryPriceFeed::new());
        feed.set_rate("eth-usd", 300_000_000_000).await; // 3000, 8 decimals
        feed.set_rate("usdc-usd", 100_000_000).await;
        let hub = Arc::new(OracleHub::new(feed));
        for (id, base) in [("eth-usd", "ETH"), ("usdc-usd", "USDC")] {
            hub.add_oracle(OracleInfo {
                feed: FeedId::from(id),
                oracle_unit: U256::exp10(8),
                base_asset: base.to_string(),
                quote_asset: "USD".to_string(),
                quote_base_currency: None,
            })
            .await?;
        }

        let strategy = FungibleTokenStrategy::new(hub);
        strategy
            .add_asset(Address::new("0xweth"), "ETH", 18, vec![FeedId::from("eth-usd")])
            .await?;
        strategy
            .add_asset(Address::new("0xusdc"), "USDC", 6, vec![FeedId::from("usdc-usd")])
            .await?;
        Ok(strategy)
    }

    #[tokio::test]
    async fn values_scale_with_token_decimals() -> Result<()> {
        let strategy = strategy().await?;

        let eth = strategy
            .get_value(&ValueInput {
                asset: Address::new("0xweth"),
                id: U256::zero(),
                amount: WAD / U256::from(2u64),
                base_currency: 1,
            })
            .await?;
        assert_eq!(eth.value_in_usd, U256::from(1_500u64) * WAD);
        assert!(eth.value_in_base_currency.is_zero());
        assert_eq!(eth.risk_variables(), RiskVariables::default());

        let usdc = strategy
            .get_value(&ValueInput {
                asset: Address::new("0xusdc"),
                id: U256::zero(),
                amount: U256::from(2_500_000u64), // 2.5 USDC
                base_currency: 1,
            })
            .await?;
        assert_eq!(usdc.value_in_usd, U256::from(2_500_000_000_000_000_000u128));
        Ok(())
    }

    #[tokio::test]
    async fn broken_oracle_chain_is_rejected() -> Result<()> {
        let strategy = strategy().await?;
        let err = strategy
            .add_asset(Address::new("0xwbtc"), "WBTC", 8, vec![FeedId::from("eth-usd")])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Invalid oracle chain for WBTC"));
        Ok(())
    }

    #[tokio::test]
    async fn deposits_are_capped_by_exposure() -> Result<()> {
        let strategy = strategy().await?;
        let weth = Address::new("0xweth");
        let mut ledger = LedgerState::default();
        ledger.exposure.set_max(&weth, 10);

        let entry = BasketEntry::new(weth.clone(), U256::zero(), U256::from(10u64));
        strategy.process_deposit(&mut ledger, &entry).await?;
        let err = strategy
            .process_deposit(&mut ledger, &BasketEntry::new(weth.clone(), U256::zero(), U256::one()))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ExposureError>(),
            Some(ExposureError::ExposureExceeded { .. })
        ));

        strategy.process_withdrawal(&mut ledger, &entry).await?;
        assert_eq!(ledger.exposure.exposure(&weth).current, 0);
        Ok(())
    }

    #[tokio::test]
    async fn risk_variables_require_known_asset() -> Result<()> {
        let strategy = strategy().await?;
        let custom = RiskVariables::new(80, 120)?;
        strategy
            .set_risk_variables(&Address::new("0xweth"), 1, custom)
            .await?;
        assert_eq!(strategy.risk_variables(&Address::new("0xweth"), 1).await?, custom);
        assert!(strategy
            .set_risk_variables(&Address::new("0xdai"), 1, custom)
            .await
            .is_err());
        Ok(())
    }
}
