use std::collections::HashMap;
use std::hash::Hash;

use crate::models::{Address, AssetKind, AssetRef};

/// Ordered set with O(1) insert, lookup and swap-remove.
#[derive(Debug, Clone)]
pub struct OwnedSet<T> {
    items: Vec<T>,
    index: HashMap<T, usize>,
}

impl<T> Default for OwnedSet<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T: Clone + Eq + Hash> OwnedSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the item was already present.
    pub fn insert(&mut self, item: T) -> bool {
        if self.index.contains_key(&item) {
            return false;
        }
        self.index.insert(item.clone(), self.items.len());
        self.items.push(item);
        true
    }

    /// Remove by swapping the last item into the freed slot.
    pub fn remove(&mut self, item: &T) -> bool {
        let Some(position) = self.index.remove(item) else {
            return false;
        };
        self.items.swap_remove(position);
        if let Some(moved) = self.items.get(position) {
            self.index.insert(moved.clone(), position);
        }
        true
    }

    pub fn contains(&self, item: &T) -> bool {
        self.index.contains_key(item)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

/// Distinct asset records of a vault. Balances are never stored; they are
/// read from custody whenever the basket is needed.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    pub fungible: OwnedSet<Address>,
    pub non_fungible: OwnedSet<AssetRef>,
    pub semi_fungible: OwnedSet<AssetRef>,
}

impl Inventory {
    pub fn record_count(&self) -> usize {
        self.fungible.len() + self.non_fungible.len() + self.semi_fungible.len()
    }

    pub fn contains(&self, kind: AssetKind, asset: &AssetRef) -> bool {
        match kind {
            AssetKind::Fungible => self.fungible.contains(&asset.address),
            AssetKind::NonFungible => self.non_fungible.contains(asset),
            AssetKind::SemiFungible => self.semi_fungible.contains(asset),
        }
    }

    /// Returns true if a new record was created.
    pub fn insert(&mut self, kind: AssetKind, asset: &AssetRef) -> bool {
        match kind {
            AssetKind::Fungible => self.fungible.insert(asset.address.clone()),
            AssetKind::NonFungible => self.non_fungible.insert(asset.clone()),
            AssetKind::SemiFungible => self.semi_fungible.insert(asset.clone()),
        }
    }

    pub fn remove(&mut self, kind: AssetKind, asset: &AssetRef) -> bool {
        match kind {
            AssetKind::Fungible => self.fungible.remove(&asset.address),
            AssetKind::NonFungible => self.non_fungible.remove(asset),
            AssetKind::SemiFungible => self.semi_fungible.remove(asset),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use primitive_types::U256;

    #[test]
    fn swap_remove_keeps_index_consistent() {
        let mut set = OwnedSet::new();
        for item in ["a", "b", "c", "d"] {
            assert!(set.insert(item));
        }
        assert!(!set.insert("b"));

        assert!(set.remove(&"b"));
        assert_eq!(set.iter().copied().collect::<Vec<_>>(), vec!["a", "d", "c"]);
        assert!(set.remove(&"d"));
        assert!(set.remove(&"c"));
        assert!(!set.remove(&"c"));
        assert!(set.contains(&"a"));
        assert_eq!(set.len(), 1);

        assert!(set.remove(&"a"));
        assert!(set.is_empty());
    }

    #[test]
    fn records_are_counted_across_kinds() {
        let mut inventory = Inventory::default();
        let weth = AssetRef::fungible("0xweth");
        let punk = AssetRef::new("0xpunks", U256::from(7u64));

        assert!(inventory.insert(AssetKind::Fungible, &weth));
        assert!(!inventory.insert(AssetKind::Fungible, &weth));
        assert!(inventory.insert(AssetKind::NonFungible, &punk));
        assert!(inventory.insert(AssetKind::SemiFungible, &punk));
        assert_eq!(inventory.record_count(), 3);

        assert!(inventory.remove(AssetKind::NonFungible, &punk));
        assert!(inventory.contains(AssetKind::SemiFungible, &punk));
        assert_eq!(inventory.record_count(), 2);
    }
}
