//! Price oracle adapter.
//!
//! Wraps an external [`PriceFeed`] and chains rates through one or more hops
//! (e.g. TOKEN→ETH→USD) at 18-decimal precision.

mod memory;

pub use memory::MemoryPriceFeed;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use primitive_types::U256;
use tokio::sync::RwLock;
use tracing::debug;

use crate::math::{mul_div_down, WAD};
use crate::models::FeedId;

/// Longest oracle chain accepted for one asset.
pub const MAX_ORACLE_HOPS: usize = 3;

/// Label every valid oracle chain must terminate in.
pub const USD_LABEL: &str = "USD";

/// Latest answer of a price feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateReading {
    pub rate: i128,
    pub timestamp: DateTime<Utc>,
}

/// External price feed network. Staleness is not checked here; a failing
/// call aborts whatever operation requested the rate.
#[async_trait::async_trait]
pub trait PriceFeed: Send + Sync {
    async fn latest_rate(&self, feed: &FeedId) -> Result<RateReading>;

    fn name(&self) -> &str;
}

/// Metadata of one oracle hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleInfo {
    pub feed: FeedId,
    /// Fixed-point unit of the feed's answer (10^feed decimals).
    pub oracle_unit: U256,
    pub base_asset: String,
    pub quote_asset: String,
    /// Set when the quote asset is a registered unit of account.
    pub quote_base_currency: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OracleError {
    #[error("Oracle {0} is already registered")]
    DuplicateOracle(FeedId),
    #[error("Oracle {0} is not registered")]
    UnknownOracle(FeedId),
    #[error("Oracle {0} has a zero unit")]
    ZeroUnit(FeedId),
    #[error("Oracle {feed} returned a negative rate {rate}")]
    NegativeRate { feed: FeedId, rate: i128 },
    #[error("Oracle sequence is empty")]
    EmptySequence,
    #[error("Oracle sequence has {0} hops, at most 3 are allowed")]
    SequenceTooLong(usize),
    #[error("Oracle sequence is broken at {feed}: expected base asset {expected}, found {found}")]
    BrokenSequence {
        feed: FeedId,
        expected: String,
        found: String,
    },
    #[error("Oracle sequence must end in USD, ends in {0}")]
    NotUsdTerminated(String),
}

/// Rate of an asset in USD or directly in the requested unit of account.
/// Exactly one side is non-zero unless the rate itself is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChainedRate {
    pub in_usd: U256,
    pub in_base_currency: U256,
}

pub struct OracleHub {
    feed: Arc<dyn PriceFeed>,
    oracles: RwLock<HashMap<FeedId, OracleInfo>>,
}

impl OracleHub {
    pub fn new(feed: Arc<dyn PriceFeed>) -> Self {
        Self {
            feed,
            oracles: RwLock::new(HashMap::new()),
        }
    }

    pub async fn add_oracle(&self, info: OracleInfo) -> Result<()> {
        if info.oracle_unit.is_zero() {
            return Err(OracleError::ZeroUnit(info.feed).into());
        }
        let mut oracles = self.oracles.write().await;
        if oracles.contains_key(&info.feed) {
            return Err(OracleError::DuplicateOracle(info.feed).into());
        }
        debug!(
            feed = %info.feed,
            base = %info.base_asset,
            quote = %info.quote_asset,
            "oracle registered"
        );
        oracles.insert(info.feed.clone(), info);
        Ok(())
    }

    pub async fn oracle(&self, feed: &FeedId) -> Option<OracleInfo> {
        self.oracles.read().await.get(feed).cloned()
    }

    /// Validate that `feeds` prices `asset_label` in USD: every hop known, each
    /// hop's quote asset is the next hop's base asset, last quote is USD.
    pub async fn check_oracle_sequence(&self, feeds: &[FeedId], asset_label: &str) -> Result<()> {
        if feeds.is_empty() {
            return Err(OracleError::EmptySequence.into());
        }
        if feeds.len() > MAX_ORACLE_HOPS {
            return Err(OracleError::SequenceTooLong(feeds.len()).into());
        }

        let oracles = self.oracles.read().await;
        let mut expected = asset_label.to_string();
        for feed in feeds {
            let info = oracles
                .get(feed)
                .ok_or_else(|| OracleError::UnknownOracle(feed.clone()))?;
            if !info.base_asset.eq_ignore_ascii_case(&expected) {
                return Err(OracleError::BrokenSequence {
                    feed: feed.clone(),
                    expected,
                    found: info.base_asset.clone(),
                }
                .into());
            }
            expected = info.quote_asset.clone();
        }

        if !expected.eq_ignore_ascii_case(USD_LABEL) {
            return Err(OracleError::NotUsdTerminated(expected).into());
        }
        Ok(())
    }

    /// Chain the rates of `feeds` for one whole unit of the asset.
    ///
    /// Stops early and returns the rate in the base currency when a hop quotes
    /// directly in `base_currency`; otherwise returns the USD rate.
    pub async fn get_rate(&self, feeds: &[FeedId], base_currency: usize) -> Result<ChainedRate> {
        let hops: Vec<OracleInfo> = {
            let oracles = self.oracles.read().await;
            feeds
                .iter()
                .map(|feed| {
                    oracles
                        .get(feed)
                        .cloned()
                        .ok_or_else(|| OracleError::UnknownOracle(feed.clone()))
                })
                .collect::<std::result::Result<_, _>>()?
        };
        if hops.is_empty() {
            return Err(OracleError::EmptySequence.into());
        }

        let mut rate = WAD;
        for hop in &hops {
            let hop_rate = self.hop_rate(&hop.feed).await?;
            rate = mul_div_down(rate, hop_rate, hop.oracle_unit)
                .with_context(|| format!("Failed to chain rate through {}", hop.feed))?;

            if hop.quote_base_currency == Some(base_currency) {
                debug!(feed = %hop.feed, base_currency, rate = %rate, "rate resolved in base currency");
                return Ok(ChainedRate {
                    in_usd: U256::zero(),
                    in_base_currency: rate,
                });
            }
        }

        debug!(hops = hops.len(), rate = %rate, "rate resolved in USD");
        Ok(ChainedRate {
            in_usd: rate,
            in_base_currency: U256::zero(),
        })
    }

    /// Latest non-negative answer of a single feed.
    pub async fn latest_rate(&self, feed: &FeedId) -> Result<U256> {
        self.hop_rate(feed).await
    }

    async fn hop_rate(&self, feed: &FeedId) -> Result<U256> {
        let reading = self
            .feed
            .latest_rate(feed)
            .await
            .with_context(|| format!("Price feed {} failed for {}", self.feed.name(), feed))?;
        if reading.rate < 0 {
            return Err(OracleError::NegativeRate {
                feed: feed.clone(),
                rate: reading.rate,
            }
            .into());
        }
        Ok(U256::from(reading.rate as u128))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(feed: &str, base: &str, quote: &str, decimals: usize) -> OracleInfo {
        OracleInfo {
            feed: FeedId::from(feed),
            oracle_unit: U256::exp10(decimals),
            base_asset: base.to_string(),
            quote_asset: quote.to_string(),
            quote_base_currency: None,
        }
    }

    async fn hub_with_chain() -> Result<(Arc<MemoryPriceFeed>, OracleHub)> {
        let feed = Arc::new(MemoryPriceFeed::new());
        feed.set_rate("link-eth", 5_000_000_000_000_000).await; // 0.005 ETH, 18 decimals
        feed.set_rate("eth-usd", 300_000_000_000).await; // 3000 USD, 8 decimals

        let hub = OracleHub::new(feed.clone());
        hub.add_oracle(info("link-eth", "LINK", "ETH", 18)).await?;
        let mut eth_usd = info("eth-usd", "ETH", "USD", 8);
        eth_usd.quote_base_currency = Some(0);
        hub.add_oracle(eth_usd).await?;
        Ok((feed, hub))
    }

    #[tokio::test]
    async fn chained_rate_multiplies_hops() -> Result<()> {
        let (_feed, hub) = hub_with_chain().await?;
        let feeds = [FeedId::from("link-eth"), FeedId::from("eth-usd")];

        // 0.005 * 3000 = 15 USD per LINK, 18 decimals.
        let rate = hub.get_rate(&feeds, 1).await?;
        assert_eq!(rate.in_usd, U256::from(15u64) * WAD);
        assert!(rate.in_base_currency.is_zero());
        Ok(())
    }

    #[tokio::test]
    async fn chained_rate_stops_at_requested_base_currency() -> Result<()> {
        let (feed, hub) = hub_with_chain().await?;
        feed.set_rate("link-eth-direct", 5_000_000_000_000_000).await;
        let mut link_eth = info("link-eth-direct", "LINK", "ETH", 18);
        link_eth.quote_base_currency = Some(1);
        hub.add_oracle(link_eth).await?;

        let feeds = [FeedId::from("link-eth-direct"), FeedId::from("eth-usd")];
        let rate = hub.get_rate(&feeds, 1).await?;
        assert!(rate.in_usd.is_zero());
        assert_eq!(rate.in_base_currency, U256::from(5_000_000_000_000_000u64));
        Ok(())
    }

    #[tokio::test]
    async fn failing_hop_aborts_the_chain() -> Result<()> {
        let (feed, hub) = hub_with_chain().await?;
        feed.fail("eth-usd").await;
        let feeds = [FeedId::from("link-eth"), FeedId::from("eth-usd")];
        let err = hub.get_rate(&feeds, 1).await.unwrap_err();
        assert!(err.to_string().contains("eth-usd"));
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_oracles_are_rejected() -> Result<()> {
        let (_feed, hub) = hub_with_chain().await?;
        let err = hub
            .add_oracle(info("eth-usd", "ETH", "USD", 8))
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<OracleError>(),
            Some(&OracleError::DuplicateOracle(FeedId::from("eth-usd")))
        );
        Ok(())
    }

    #[tokio::test]
    async fn negative_rates_abort() -> Result<()> {
        let (feed, hub) = hub_with_chain().await?;
        feed.set_rate("eth-usd", -1).await;
        let err = hub
            .get_rate(&[FeedId::from("eth-usd")], 1)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OracleError>(),
            Some(OracleError::NegativeRate { rate: -1, .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn sequence_validation() -> Result<()> {
        let (_feed, hub) = hub_with_chain().await?;
        let good = [FeedId::from("link-eth"), FeedId::from("eth-usd")];
        hub.check_oracle_sequence(&good, "LINK").await?;

        let err = hub
            .check_oracle_sequence(&good, "WBTC")
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OracleError>(),
            Some(OracleError::BrokenSequence { .. })
        ));

        let err = hub
            .check_oracle_sequence(&[FeedId::from("link-eth")], "LINK")
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OracleError>(),
            Some(OracleError::NotUsdTerminated(_))
        ));

        let err = hub.check_oracle_sequence(&[], "LINK").await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<OracleError>(),
            Some(&OracleError::EmptySequence)
        );
        Ok(())
    }
}
