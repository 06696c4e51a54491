use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::models::Address;
use crate::risk::RiskVariables;

/// Risk variables per `(asset, base currency)`, with a fallback for pairs
/// that were never configured.
#[derive(Debug, Default)]
pub struct RiskTable {
    default: RiskVariables,
    entries: RwLock<HashMap<(Address, usize), RiskVariables>>,
}

impl RiskTable {
    pub fn new(default: RiskVariables) -> Self {
        Self {
            default,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, asset: &Address, base_currency: usize) -> RiskVariables {
        self.entries
            .read()
            .await
            .get(&(asset.clone(), base_currency))
            .copied()
            .unwrap_or(self.default)
    }

    pub async fn set(&self, asset: &Address, base_currency: usize, risk: RiskVariables) {
        self.entries
            .write()
            .await
            .insert((asset.clone(), base_currency), risk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unset_pairs_fall_back_to_default() {
        let table = RiskTable::new(RiskVariables::default());
        let asset = Address::new("0xa");
        table.set(&asset, 1, RiskVariables::new(80, 120).unwrap()).await;

        assert_eq!(table.get(&asset, 1).await, RiskVariables::new(80, 120).unwrap());
        assert_eq!(table.get(&asset, 0).await, RiskVariables::default());
    }
}
