use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use primitive_types::U256;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{AssetValue, LedgerState, PricingError, PricingStrategy, RiskTable, ValueInput};
use crate::math::checked_mul;
use crate::models::{Address, BasketEntry, FeedId};
use crate::oracle::OracleHub;
use crate::risk::RiskVariables;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionInfo {
    pub label: String,
    pub id_range_start: U256,
    pub id_range_end: U256,
    /// Chain quoting the floor price of one item.
    pub oracles: Vec<FeedId>,
}

impl CollectionInfo {
    pub fn contains(&self, id: U256) -> bool {
        self.id_range_start <= id && id <= self.id_range_end
    }
}

/// Unique items valued at their collection's floor price. Every id inside the
/// configured range shares one price.
pub struct FloorCollectionStrategy {
    oracles: Arc<OracleHub>,
    collections: RwLock<HashMap<Address, CollectionInfo>>,
    risk: RiskTable,
}

impl FloorCollectionStrategy {
    pub const NAME: &'static str = "floor_collection";

    pub fn new(oracles: Arc<OracleHub>) -> Self {
        Self {
            oracles,
            collections: RwLock::new(HashMap::new()),
            risk: RiskTable::default(),
        }
    }

    pub fn with_default_risk(mut self, risk: RiskVariables) -> Self {
        self.risk = RiskTable::new(risk);
        self
    }

    pub async fn add_collection(&self, address: Address, info: CollectionInfo) -> Result<()> {
        if info.id_range_start > info.id_range_end {
            anyhow::bail!(
                "Collection {} has an empty id range [{}, {}]",
                info.label,
                info.id_range_start,
                info.id_range_end
            );
        }
        self.oracles
            .check_oracle_sequence(&info.oracles, &info.label)
            .await
            .with_context(|| format!("Invalid oracle chain for {}", info.label))?;

        let mut collections = self.collections.write().await;
        if collections.contains_key(&address) {
            return Err(PricingError::DuplicateAsset(address).into());
        }
        info!(
            collection = %address,
            label = %info.label,
            start = %info.id_range_start,
            end = %info.id_range_end,
            "collection added"
        );
        collections.insert(address, info);
        Ok(())
    }

    async fn collection(&self, asset: &Address) -> Result<CollectionInfo> {
        self.collections
            .read()
            .await
            .get(asset)
            .cloned()
            .ok_or_else(|| PricingError::UnknownAsset(asset.clone()).into())
    }

    /// Resolve the collection of an entry, requiring an in-range id and a
    /// unit amount.
    async fn checked_item(&self, entry: &BasketEntry) -> Result<CollectionInfo> {
        let info = self.collection(&entry.address).await?;
        if !info.contains(entry.id) {
            return Err(PricingError::IdNotWhitelisted {
                asset: entry.address.clone(),
                id: entry.id,
            }
            .into());
        }
        if entry.amount != U256::one() {
            return Err(PricingError::InvalidAmount {
                asset: entry.address.clone(),
                amount: entry.amount,
            }
            .into());
        }
        Ok(info)
    }
}

#[async_trait::async_trait]
impl PricingStrategy for FloorCollectionStrategy {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn assets(&self) -> Vec<Address> {
        let mut assets: Vec<Address> = self.collections.read().await.keys().cloned().collect();
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
            .collections
            .read()
            .await
            .get(asset)
            .is_some_and(|info| info.contains(id)))
    }

    async fn get_value(&self, input: &ValueInput) -> Result<AssetValue> {
        let entry = BasketEntry::new(input.asset.clone(), input.id, input.amount);
        let info = self.checked_item(&entry).await?;
        let rate = self
            .oracles
            .get_rate(&info.oracles, input.base_currency)
            .await
            .with_context(|| format!("Failed to price {} #{}", info.label, input.id))?;

        let value_in_usd = checked_mul(rate.in_usd, input.amount)?;
        let value_in_base_currency = checked_mul(rate.in_base_currency, input.amount)?;
        let risk = self.risk.get(&input.asset, input.base_currency).await;
        debug!(
            collection = %input.asset,
            id = %input.id,
            floor_in_usd = %value_in_usd,
            "collection item valued"
        );

        Ok(AssetValue {
            value_in_usd,
            value_in_base_currency,
            collateral_factor: risk.collateral_factor,
            liquidation_threshold: risk.liquidation_threshold,
        })
    }

    async fn risk_variables(&self, asset: &Address, base_currency: usize) -> Result<RiskVariables> {
        self.collection(asset).await?;
        Ok(self.risk.get(asset, base_currency).await)
    }

    async fn set_risk_variables(
        &self,
        asset: &Address,
        base_currency: usize,
        risk: RiskVariables,
    ) -> Result<()> {
        self.collection(asset).await?;
        self.risk.set(asset, base_currency, risk).await;
        Ok(())
    }

    async fn process_deposit(&self, ledger: &mut LedgerState, entry: &BasketEntry) -> Result<()> {
        self.checked_item(entry).await?;
        ledger.exposure.increase(&entry.address, 1)?;
        Ok(())
    }

    async fn process_withdrawal(
        &self,
        ledger: &mut LedgerState,
        entry: &BasketEntry,
    ) -> Result<()> {
        self.checked_item(entry).await?;
        ledger.exposure.decrease(&entry.address, 1)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::WAD;
    use crate::oracle::{MemoryPriceFeed, OracleInfo};

    async fn strategy() -> Result<FloorCollectionStrategy> {
        let feed = Arc::new(MemoryPriceFeed::new());
        feed.set_rate("punks-floor", 50_000_000_000_000_000_000_000).await; // 50000 USD, 18 decimals
        let hub = Arc::new(OracleHub::new(feed));
        hub.add_oracle(OracleInfo {
            feed: FeedId::from("punks-floor"),
            oracle_unit: WAD,
            base_asset: "PUNK".to_string(),
            quote_asset: "USD".to_string(),
            quote_base_currency: None,
        })
        .await?;

        let strategy = FloorCollectionStrategy::new(hub);
        strategy
            .add_collection(
                Address::new("0xpunks"),
                CollectionInfo {
                    label: "PUNK".to_string(),
                    id_range_start: U256::zero(),
                    id_range_end: U256::from(9_999u64),
                    oracles: vec![FeedId::from("punks-floor")],
                },
            )
            .await?;
        Ok(strategy)
    }

    #[tokio::test]
    async fn whitelist_follows_id_range() -> Result<()> {
        let strategy = strategy().await?;
        let ledger = LedgerState::default();
        let punks = Address::new("0xpunks");

        assert!(strategy.is_whitelisted(&ledger, &punks, U256::zero()).await?);
        assert!(strategy.is_whitelisted(&ledger, &punks, U256::from(9_999u64)).await?);
        assert!(!strategy.is_whitelisted(&ledger, &punks, U256::from(10_000u64)).await?);
        assert!(!strategy
            .is_whitelisted(&ledger, &Address::new("0xother"), U256::zero())
            .await?);
        Ok(())
    }

    #[tokio::test]
    async fn items_are_valued_at_floor() -> Result<()> {
        let strategy = strategy().await?;
        let value = strategy
            .get_value(&ValueInput {
                asset: Address::new("0xpunks"),
                id: U256::from(42u64),
                amount: U256::one(),
                base_currency: 1,
            })
            .await?;
        assert_eq!(value.value_in_usd, U256::from(50_000u64) * WAD);
        Ok(())
    }

    #[tokio::test]
    async fn amount_other_than_one_is_rejected() -> Result<()> {
        let strategy = strategy().await?;
        let err = strategy
            .get_value(&ValueInput {
                asset: Address::new("0xpunks"),
                id: U256::from(42u64),
                amount: U256::from(2u64),
                base_currency: 1,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PricingError>(),
            Some(PricingError::InvalidAmount { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn exposure_counts_items() -> Result<()> {
        let strategy = strategy().await?;
        let punks = Address::new("0xpunks");
        let mut ledger = LedgerState::default();
        ledger.exposure.set_max(&punks, 2);

        for id in [1u64, 2] {
            let entry = BasketEntry::new(punks.clone(), U256::from(id), U256::one());
            strategy.process_deposit(&mut ledger, &entry).await?;
        }
        assert_eq!(ledger.exposure.exposure(&punks).current, 2);

        let third = BasketEntry::new(punks.clone(), U256::from(3u64), U256::one());
        assert!(strategy.process_deposit(&mut ledger, &third).await.is_err());

        let out_of_range = BasketEntry::new(punks.clone(), U256::from(10_000u64), U256::one());
        assert!(strategy.process_withdrawal(&mut ledger, &out_of_range).await.is_err());
        Ok(())
    }
}
