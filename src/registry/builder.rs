use std::sync::Arc;

use anyhow::{Context, Result};
use primitive_types::U256;
use tracing::info;

use super::{AssetRegistry, BaseCurrencyConfig};
use crate::collaborators::{MemoryFactory, VaultFactory};
use crate::config::Config;
use crate::math::unit_for_decimals;
use crate::models::{Address, USD_INDEX};
use crate::oracle::{MemoryPriceFeed, OracleHub, OracleInfo, PriceFeed, USD_LABEL};
use crate::pricing::{
    CollectionInfo, ConcentratedLiquidityStrategy, FloorCollectionStrategy, FungibleTokenStrategy,
    SemiFungibleAsset, SemiFungibleStrategy,
};
use crate::venue::LiquidityVenue;

/// Assembles an [`AssetRegistry`] from the manifest sections of a [`Config`].
///
/// Without an explicit price feed, the `[[feeds]]` entries are served by a
/// [`MemoryPriceFeed`]. Position managers require a liquidity venue.
pub struct RegistryBuilder {
    config: Config,
    feed: Option<Arc<dyn PriceFeed>>,
    factory: Option<Arc<dyn VaultFactory>>,
    venue: Option<Arc<dyn LiquidityVenue>>,
}

impl RegistryBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            feed: None,
            factory: None,
            venue: None,
        }
    }

    pub fn with_price_feed(mut self, feed: Arc<dyn PriceFeed>) -> Self {
        self.feed = Some(feed);
        self
    }

    pub fn with_factory(mut self, factory: Arc<dyn VaultFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn with_venue(mut self, venue: Arc<dyn LiquidityVenue>) -> Self {
        self.venue = Some(venue);
        self
    }

    /// Index a base currency label will receive, USD being 0.
    fn base_currency_index(&self, label: &str) -> Result<usize> {
        if label.eq_ignore_ascii_case(USD_LABEL) {
            return Ok(USD_INDEX);
        }
        self.config
            .base_currencies
            .iter()
            .position(|bc| bc.label.eq_ignore_ascii_case(label))
            .map(|position| position + 1)
            .with_context(|| format!("Unknown base currency {label}"))
    }

    pub async fn build(self) -> Result<Arc<AssetRegistry>> {
        let feed = match &self.feed {
            Some(feed) => feed.clone(),
            None => {
                let memory = MemoryPriceFeed::new();
                for entry in &self.config.feeds {
                    memory.set_rate(entry.feed.clone(), entry.rate).await;
                }
                Arc::new(memory) as Arc<dyn PriceFeed>
            }
        };
        let hub = Arc::new(OracleHub::new(feed));
        for entry in &self.config.oracles {
            let quote_base_currency = entry
                .quote_base_currency
                .as_deref()
                .map(|label| self.base_currency_index(label))
                .transpose()?;
            hub.add_oracle(OracleInfo {
                feed: entry.feed.clone(),
                oracle_unit: unit_for_decimals(entry.decimals)?,
                base_asset: entry.base_asset.clone(),
                quote_asset: entry.quote_asset.clone(),
                quote_base_currency,
            })
            .await?;
        }

        let factory = self
            .factory
            .clone()
            .unwrap_or_else(|| {
                Arc::new(MemoryFactory::new(Address::derive(&["factory"]))) as Arc<dyn VaultFactory>
            });
        let registry = Arc::new(AssetRegistry::new(hub.clone(), factory));

        for entry in &self.config.base_currencies {
            registry
                .add_base_currency(BaseCurrencyConfig {
                    label: entry.label.clone(),
                    decimals: entry.decimals,
                    native_asset: entry.native_asset.clone(),
                    to_usd_feed: entry.to_usd_feed.clone(),
                })
                .await?;
        }

        let default_risk = self.config.risk.default_risk_variables()?;

        let fungible =
            Arc::new(FungibleTokenStrategy::new(hub.clone()).with_default_risk(default_risk));
        for entry in &self.config.fungible {
            fungible
                .add_asset(entry.address.clone(), &entry.label, entry.decimals, entry.oracles.clone())
                .await?;
        }

        let collections = FloorCollectionStrategy::new(hub.clone()).with_default_risk(default_risk);
        for entry in &self.config.collections {
            collections
                .add_collection(
                    entry.address.clone(),
                    CollectionInfo {
                        label: entry.label.clone(),
                        id_range_start: U256::from(entry.id_range_start),
                        id_range_end: U256::from(entry.id_range_end),
                        oracles: entry.oracles.clone(),
                    },
                )
                .await?;
        }

        let semi_fungible = SemiFungibleStrategy::new(hub.clone()).with_default_risk(default_risk);
        for entry in &self.config.semi_fungible {
            semi_fungible
                .add_asset(
                    entry.address.clone(),
                    SemiFungibleAsset {
                        label: entry.label.clone(),
                        id: U256::from(entry.id),
                        oracles: entry.oracles.clone(),
                        asset_unit: unit_for_decimals(entry.decimals)?,
                    },
                )
                .await?;
        }

        registry.add_strategy(fungible.clone()).await?;
        registry.add_strategy(Arc::new(collections)).await?;
        registry.add_strategy(Arc::new(semi_fungible)).await?;
        registry.assign_strategy_assets(FungibleTokenStrategy::NAME).await?;
        registry.assign_strategy_assets(FloorCollectionStrategy::NAME).await?;
        registry.assign_strategy_assets(SemiFungibleStrategy::NAME).await?;

        if !self.config.position_managers.is_empty() {
            let venue = self
                .venue
                .clone()
                .context("Position managers are configured but no liquidity venue is available")?;
            let liquidity = ConcentratedLiquidityStrategy::new(venue, fungible.clone())
                .with_twat_window(self.config.liquidity.twat_window)
                .with_max_tick_distance(self.config.liquidity.max_tick_distance);
            for manager in &self.config.position_managers {
                liquidity.add_position_manager(manager.clone()).await?;
            }
            registry.add_strategy(Arc::new(liquidity)).await?;
            registry
                .assign_strategy_assets(ConcentratedLiquidityStrategy::NAME)
                .await?;
        }

        for entry in &self.config.exposure {
            registry.set_max_exposure(&entry.asset, entry.max).await;
        }
        for entry in &self.config.risk_variables {
            let base_currency = registry.base_currency_index(&entry.base_currency).await?;
            registry
                .set_risk_variables(
                    &entry.asset,
                    base_currency,
                    entry.collateral_factor,
                    entry.liquidation_threshold,
                )
                .await
                .with_context(|| format!("Invalid risk variables for {}", entry.asset))?;
        }

        info!(
            base_currencies = self.config.base_currencies.len() + 1,
            fungible = self.config.fungible.len(),
            collections = self.config.collections.len(),
            semi_fungible = self.config.semi_fungible.len(),
            position_managers = self.config.position_managers.len(),
            "registry built"
        );
        Ok(registry)
    }
}
