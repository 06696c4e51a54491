//! Concentrated-liquidity venue: position manager plus pool observations.

use std::collections::HashMap;

use anyhow::Result;
use primitive_types::U256;
use tokio::sync::Mutex;

use crate::models::Address;

/// Position as reported by a position manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionInfo {
    pub token0: Address,
    pub token1: Address,
    pub fee: u32,
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub liquidity: u128,
}

#[async_trait::async_trait]
pub trait LiquidityVenue: Send + Sync {
    /// Position `id` of `manager`, or None if it does not exist.
    async fn position(&self, manager: &Address, id: U256) -> Result<Option<PositionInfo>>;

    async fn pool_for(&self, token0: &Address, token1: &Address, fee: u32) -> Result<Address>;

    /// Cumulative tick values of `pool`, one per entry of `seconds_ago`.
    async fn observe(&self, pool: &Address, seconds_ago: &[u32]) -> Result<Vec<i64>>;

    fn name(&self) -> &str;
}

/// Observation clock of [`MemoryVenue`], in seconds.
const MEMORY_VENUE_NOW: i64 = 1_000_000_000;

/// In-memory venue whose pools sit at a constant tick.
#[derive(Default)]
pub struct MemoryVenue {
    positions: Mutex<HashMap<(Address, U256), PositionInfo>>,
    pools: Mutex<HashMap<(Address, Address, u32), Address>>,
    ticks: Mutex<HashMap<Address, i32>>,
}

impl MemoryVenue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_position(&self, manager: &Address, id: U256, position: PositionInfo) {
        self.positions
            .lock()
            .await
            .insert((manager.clone(), id), position);
    }

    pub async fn burn_position(&self, manager: &Address, id: U256) {
        self.positions.lock().await.remove(&(manager.clone(), id));
    }

    /// Register `pool` for a token pair and fee tier, trading at `tick`.
    pub async fn set_pool(&self, token0: &Address, token1: &Address, fee: u32, pool: Address, tick: i32) {
        self.pools
            .lock()
            .await
            .insert((token0.clone(), token1.clone(), fee), pool.clone());
        self.ticks.lock().await.insert(pool, tick);
    }
}

#[async_trait::async_trait]
impl LiquidityVenue for MemoryVenue {
    async fn position(&self, manager: &Address, id: U256) -> Result<Option<PositionInfo>> {
        Ok(self.positions.lock().await.get(&(manager.clone(), id)).cloned())
    }

    async fn pool_for(&self, token0: &Address, token1: &Address, fee: u32) -> Result<Address> {
        self.pools
            .lock()
            .await
            .get(&(token0.clone(), token1.clone(), fee))
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("No pool for {token0}/{token1} at fee {fee}"))
    }

    async fn observe(&self, pool: &Address, seconds_ago: &[u32]) -> Result<Vec<i64>> {
        let tick = self
            .ticks
            .lock()
            .await
            .get(pool)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("Pool {pool} has no observations"))?;
        Ok(seconds_ago
            .iter()
            .map(|ago| i64::from(tick) * (MEMORY_VENUE_NOW - i64::from(*ago)))
            .collect())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
