use primitive_types::U256;
use serde::{Deserialize, Serialize};

use super::Address;

/// Custody class of an asset. Determines how a vault stores and reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    /// Interchangeable token, tracked by address only (id is always 0).
    Fungible,
    /// Unique item, tracked by `(address, id)` with an implicit amount of 1.
    NonFungible,
    /// Per-id balance, tracked by `(address, id)`.
    SemiFungible,
}

/// Reference to one asset instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetRef {
    pub address: Address,
    pub id: U256,
}

impl AssetRef {
    pub fn new(address: impl Into<Address>, id: U256) -> Self {
        Self {
            address: address.into(),
            id,
        }
    }

    pub fn fungible(address: impl Into<Address>) -> Self {
        Self::new(address, U256::zero())
    }
}

/// One line of a basket: an asset instance and the amount held.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasketEntry {
    pub address: Address,
    pub id: U256,
    pub amount: U256,
}

impl BasketEntry {
    pub fn new(address: impl Into<Address>, id: U256, amount: U256) -> Self {
        Self {
            address: address.into(),
            id,
            amount,
        }
    }

    pub fn asset_ref(&self) -> AssetRef {
        AssetRef::new(self.address.clone(), self.id)
    }
}

/// A basket entry together with its custody class, as passed to deposits and
/// withdrawals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetTransfer {
    pub kind: AssetKind,
    pub entry: BasketEntry,
}

impl AssetTransfer {
    pub fn fungible(address: impl Into<Address>, amount: U256) -> Self {
        Self {
            kind: AssetKind::Fungible,
            entry: BasketEntry::new(address, U256::zero(), amount),
        }
    }

    pub fn non_fungible(address: impl Into<Address>, id: U256) -> Self {
        Self {
            kind: AssetKind::NonFungible,
            entry: BasketEntry::new(address, id, U256::one()),
        }
    }

    pub fn semi_fungible(address: impl Into<Address>, id: U256, amount: U256) -> Self {
        Self {
            kind: AssetKind::SemiFungible,
            entry: BasketEntry::new(address, id, amount),
        }
    }
}

/// Split a basket into the parallel address/id/amount lists the registry
/// valuation entry points take.
pub fn split_basket(entries: &[BasketEntry]) -> (Vec<Address>, Vec<U256>, Vec<U256>) {
    let mut addresses = Vec::with_capacity(entries.len());
    let mut ids = Vec::with_capacity(entries.len());
    let mut amounts = Vec::with_capacity(entries.len());
    for entry in entries {
        addresses.push(entry.address.clone());
        ids.push(entry.id);
        amounts.push(entry.amount);
    }
    (addresses, ids, amounts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_kind_serialization() {
        let json = serde_json::to_string(&AssetKind::SemiFungible).unwrap();
        assert_eq!(json, r#""semi_fungible""#);
    }

    #[test]
    fn non_fungible_transfer_has_unit_amount() {
        let transfer = AssetTransfer::non_fungible("0xnft", U256::from(7u64));
        assert_eq!(transfer.entry.amount, U256::one());
        assert_eq!(transfer.entry.id, U256::from(7u64));
    }

    #[test]
    fn split_basket_preserves_order() {
        let entries = vec![
            BasketEntry::new("0xa", U256::zero(), U256::from(5u64)),
            BasketEntry::new("0xb", U256::from(2u64), U256::one()),
        ];
        let (addresses, ids, amounts) = split_basket(&entries);
        assert_eq!(addresses, vec![Address::new("0xa"), Address::new("0xb")]);
        assert_eq!(ids, vec![U256::zero(), U256::from(2u64)]);
        assert_eq!(amounts, vec![U256::from(5u64), U256::one()]);
    }
}
