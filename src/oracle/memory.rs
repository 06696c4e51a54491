use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use chrono::Utc;
use tokio::sync::Mutex;

use super::{PriceFeed, RateReading};
use crate::models::FeedId;

/// In-memory price feed for tests and offline valuation.
#[derive(Default)]
pub struct MemoryPriceFeed {
    rates: Mutex<HashMap<FeedId, RateReading>>,
    failing: Mutex<HashSet<FeedId>>,
    calls: AtomicUsize,
}

impl MemoryPriceFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_rate(&self, feed: impl Into<FeedId>, rate: i128) {
        let mut rates = self.rates.lock().await;
        rates.insert(
            feed.into(),
            RateReading {
                rate,
                timestamp: Utc::now(),
            },
        );
    }

    /// Make every subsequent read of `feed` fail, as if the feed reverted.
    pub async fn fail(&self, feed: impl Into<FeedId>) {
        self.failing.lock().await.insert(feed.into());
    }

    pub async fn recover(&self, feed: &FeedId) {
        self.failing.lock().await.remove(feed);
    }

    /// Number of `latest_rate` calls served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl PriceFeed for MemoryPriceFeed {
    async fn latest_rate(&self, feed: &FeedId) -> Result<RateReading> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().await.contains(feed) {
            anyhow::bail!("Feed {feed} reverted");
        }
        let rates = self.rates.lock().await;
        rates
            .get(feed)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Feed {feed} has no answer"))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failing_feed_reverts_until_recovered() -> Result<()> {
        let feed = MemoryPriceFeed::new();
        feed.set_rate("eth-usd", 42).await;
        feed.fail("eth-usd").await;

        let id = FeedId::from("eth-usd");
        assert!(feed.latest_rate(&id).await.is_err());

        feed.recover(&id).await;
        assert_eq!(feed.latest_rate(&id).await?.rate, 42);
        assert_eq!(feed.calls(), 2);
        Ok(())
    }
}
