//! Protocol-wide exposure per underlying asset.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::Address;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exposure {
    pub current: u128,
    pub max: u128,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExposureError {
    #[error("Exposure of {asset} would reach {requested}, cap is {max}")]
    ExposureExceeded {
        asset: Address,
        requested: u128,
        max: u128,
    },
    #[error("Exposure of {asset} is {current}, cannot remove {amount}")]
    ExposureUnderflow {
        asset: Address,
        current: u128,
        amount: u128,
    },
}

/// Running exposure keyed by underlying asset address, shared by every
/// pricing strategy. Cloned into a working copy for batched updates.
#[derive(Debug, Clone, Default)]
pub struct ExposureLedger {
    entries: HashMap<Address, Exposure>,
}

impl ExposureLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cap. Lowering it below the current exposure is allowed; it only
    /// blocks further increases.
    pub fn set_max(&mut self, asset: &Address, max: u128) {
        let entry = self.entries.entry(asset.clone()).or_default();
        entry.max = max;
        debug!(asset = %asset, max, current = entry.current, "exposure cap set");
    }

    pub fn increase(&mut self, asset: &Address, amount: u128) -> Result<(), ExposureError> {
        let entry = self.entries.entry(asset.clone()).or_default();
        let requested = entry.current.checked_add(amount).ok_or_else(|| {
            ExposureError::ExposureExceeded {
                asset: asset.clone(),
                requested: u128::MAX,
                max: entry.max,
            }
        })?;
        if requested > entry.max {
            return Err(ExposureError::ExposureExceeded {
                asset: asset.clone(),
                requested,
                max: entry.max,
            });
        }
        entry.current = requested;
        Ok(())
    }

    pub fn decrease(&mut self, asset: &Address, amount: u128) -> Result<(), ExposureError> {
        let current = self.exposure(asset).current;
        let remaining = current
            .checked_sub(amount)
            .ok_or_else(|| ExposureError::ExposureUnderflow {
                asset: asset.clone(),
                current,
                amount,
            })?;
        if let Some(entry) = self.entries.get_mut(asset) {
            entry.current = remaining;
        }
        Ok(())
    }

    pub fn exposure(&self, asset: &Address) -> Exposure {
        self.entries.get(asset).copied().unwrap_or_default()
    }

    /// An asset is allowed as collateral once it has a non-zero cap.
    pub fn is_allowed(&self, asset: &Address) -> bool {
        self.exposure(asset).max > 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Address, &Exposure)> {
        self.entries.iter()
    }

    /// Undo a committed move of `asset` from `before` to `after`, ignoring the
    /// cap. Changes made by other batches in between are kept.
    pub fn revert(&mut self, asset: &Address, before: u128, after: u128) {
        let entry = self.entries.entry(asset.clone()).or_default();
        entry.current = if after >= before {
            entry.current.saturating_sub(after - before)
        } else {
            entry.current.saturating_add(before - after)
        };
        debug!(asset = %asset, current = entry.current, "exposure reverted");
    }
}
