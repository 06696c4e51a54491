//! External collaborators of a vault and their in-memory implementations.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{bail, Result};
use primitive_types::U256;
use tokio::sync::Mutex;
use tracing::debug;

use crate::models::{Address, AssetKind, AssetTransfer};

/// Token custody: moves assets between owners and vaults.
#[async_trait::async_trait]
pub trait Custody: Send + Sync {
    async fn transfer_in(&self, transfer: &AssetTransfer, from: &Address, vault: &Address) -> Result<()>;

    async fn transfer_out(&self, transfer: &AssetTransfer, vault: &Address, to: &Address) -> Result<()>;

    async fn balance_of(&self, kind: AssetKind, asset: &Address, id: U256, holder: &Address) -> Result<U256>;
}

/// Vault-issuing factory.
#[async_trait::async_trait]
pub trait VaultFactory: Send + Sync {
    fn address(&self) -> &Address;

    async fn is_registered_vault(&self, vault: &Address) -> Result<bool>;

    async fn transfer_vault_ownership(&self, vault: &Address, new_owner: &Address) -> Result<()>;
}

/// What a lending protocol requires of a vault opening a margin account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarginAccountTerms {
    pub base_currency: usize,
    pub liquidator: Address,
}

/// Lending protocol trusted to borrow against a vault.
#[async_trait::async_trait]
pub trait TrustedProtocol: Send + Sync {
    fn address(&self) -> &Address;

    async fn open_margin_account(&self, vault: &Address) -> Result<MarginAccountTerms>;

    /// Current open debt of `vault`, in the vault's base currency.
    async fn open_position(&self, vault: &Address) -> Result<U256>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuctionRequest {
    pub vault: Address,
    pub life: u32,
    pub keeper: Address,
    pub owner: Address,
    pub debt: U256,
    pub liquidation_threshold: u16,
    pub base_currency: usize,
}

/// Liquidation auction executor.
#[async_trait::async_trait]
pub trait Liquidator: Send + Sync {
    fn address(&self) -> &Address;

    async fn start_auction(&self, request: AuctionRequest) -> Result<()>;
}

type BalanceKey = (Address, Address, U256);

/// In-memory custody. Balances are keyed by `(holder, asset, id)`; fungible
/// tokens use id 0.
#[derive(Default)]
pub struct MemoryCustody {
    balances: Mutex<HashMap<BalanceKey, U256>>,
    failing: AtomicBool,
}

impl MemoryCustody {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn mint(&self, holder: &Address, asset: &Address, id: U256, amount: U256) {
        let mut balances = self.balances.lock().await;
        let balance = balances
            .entry((holder.clone(), asset.clone(), id))
            .or_insert_with(U256::zero);
        *balance = balance.saturating_add(amount);
    }

    /// Make every subsequent transfer fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    async fn move_balance(&self, transfer: &AssetTransfer, from: &Address, to: &Address) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("Transfer of {} reverted", transfer.entry.address);
        }
        let entry = &transfer.entry;
        let mut balances = self.balances.lock().await;
        let from_key = (from.clone(), entry.address.clone(), entry.id);
        let available = balances.get(&from_key).copied().unwrap_or_default();
        if available < entry.amount {
            bail!(
                "{} holds {} of {} #{}, cannot transfer {}",
                from,
                available,
                entry.address,
                entry.id,
                entry.amount
            );
        }
        balances.insert(from_key, available - entry.amount);
        let to_balance = balances
            .entry((to.clone(), entry.address.clone(), entry.id))
            .or_insert_with(U256::zero);
        *to_balance = to_balance.saturating_add(entry.amount);
        debug!(asset = %entry.address, id = %entry.id, amount = %entry.amount, from = %from, to = %to, "custody transfer");
        Ok(())
    }
}

#[async_trait::async_trait]
impl Custody for MemoryCustody {
    async fn transfer_in(&self, transfer: &AssetTransfer, from: &Address, vault: &Address) -> Result<()> {
        self.move_balance(transfer, from, vault).await
    }

    async fn transfer_out(&self, transfer: &AssetTransfer, vault: &Address, to: &Address) -> Result<()> {
        self.move_balance(transfer, vault, to).await
    }

    async fn balance_of(&self, kind: AssetKind, asset: &Address, id: U256, holder: &Address) -> Result<U256> {
        let id = match kind {
            AssetKind::Fungible => U256::zero(),
            AssetKind::NonFungible | AssetKind::SemiFungible => id,
        };
        Ok(self
            .balances
            .lock()
            .await
            .get(&(holder.clone(), asset.clone(), id))
            .copied()
            .unwrap_or_default())
    }
}

/// In-memory factory deriving vault addresses from owner and salt.
pub struct MemoryFactory {
    address: Address,
    vaults: Mutex<HashSet<Address>>,
    owners: Mutex<HashMap<Address, Address>>,
}

impl MemoryFactory {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            vaults: Mutex::new(HashSet::new()),
            owners: Mutex::new(HashMap::new()),
        }
    }

    /// Register a new vault for `owner` and return its address.
    pub async fn create_vault(&self, owner: &Address, salt: u64) -> Result<Address> {
        let vault = Address::derive(&[self.address.as_str(), owner.as_str(), &salt.to_string()]);
        if !self.vaults.lock().await.insert(vault.clone()) {
            bail!("Vault {vault} already exists");
        }
        self.owners.lock().await.insert(vault.clone(), owner.clone());
        debug!(vault = %vault, owner = %owner, "vault created");
        Ok(vault)
    }

    pub async fn owner_of(&self, vault: &Address) -> Option<Address> {
        self.owners.lock().await.get(vault).cloned()
    }
}

#[async_trait::async_trait]
impl VaultFactory for MemoryFactory {
    fn address(&self) -> &Address {
        &self.address
    }

    async fn is_registered_vault(&self, vault: &Address) -> Result<bool> {
        Ok(self.vaults.lock().await.contains(vault))
    }

    async fn transfer_vault_ownership(&self, vault: &Address, new_owner: &Address) -> Result<()> {
        let mut owners = self.owners.lock().await;
        let Some(owner) = owners.get_mut(vault) else {
            bail!("Vault {vault} is not registered");
        };
        *owner = new_owner.clone();
        Ok(())
    }
}

/// Lending protocol with externally set debts.
pub struct FixedDebtProtocol {
    address: Address,
    terms: MarginAccountTerms,
    debts: Mutex<HashMap<Address, U256>>,
}

impl FixedDebtProtocol {
    pub fn new(address: Address, terms: MarginAccountTerms) -> Self {
        Self {
            address,
            terms,
            debts: Mutex::new(HashMap::new()),
        }
    }

    pub async fn set_debt(&self, vault: &Address, debt: U256) {
        self.debts.lock().await.insert(vault.clone(), debt);
    }
}

#[async_trait::async_trait]
impl TrustedProtocol for FixedDebtProtocol {
    fn address(&self) -> &Address {
        &self.address
    }

    async fn open_margin_account(&self, _vault: &Address) -> Result<MarginAccountTerms> {
        Ok(self.terms.clone())
    }

    async fn open_position(&self, vault: &Address) -> Result<U256> {
        Ok(self.debts.lock().await.get(vault).copied().unwrap_or_default())
    }
}

/// Liquidator that records every auction it is asked to start.
pub struct RecordingLiquidator {
    address: Address,
    requests: Mutex<Vec<AuctionRequest>>,
    failing: AtomicBool,
}

impl RecordingLiquidator {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            requests: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn requests(&self) -> Vec<AuctionRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl Liquidator for RecordingLiquidator {
    fn address(&self) -> &Address {
        &self.address
    }

    async fn start_auction(&self, request: AuctionRequest) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("Auction for {} could not be started", request.vault);
        }
        self.requests.lock().await.push(request);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn custody_moves_balances() -> Result<()> {
        let custody = MemoryCustody::new();
        let alice = Address::new("0xalice");
        let vault = Address::new("0xvault");
        let weth = Address::new("0xweth");
        custody.mint(&alice, &weth, U256::zero(), U256::from(10u64)).await;

        let transfer = AssetTransfer::fungible(weth.clone(), U256::from(4u64));
        custody.transfer_in(&transfer, &alice, &vault).await?;
        assert_eq!(
            custody.balance_of(AssetKind::Fungible, &weth, U256::zero(), &vault).await?,
            U256::from(4u64)
        );

        let too_much = AssetTransfer::fungible(weth.clone(), U256::from(7u64));
        assert!(custody.transfer_in(&too_much, &alice, &vault).await.is_err());

        custody.set_failing(true);
        assert!(custody.transfer_out(&transfer, &vault, &alice).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn factory_derives_stable_vault_addresses() -> Result<()> {
        let factory = MemoryFactory::new(Address::new("0xfactory"));
        let owner = Address::new("0xowner");
        let vault = factory.create_vault(&owner, 1).await?;
        assert_eq!(
            vault,
            Address::derive(&["0xfactory", "0xowner", "1"])
        );
        assert!(factory.create_vault(&owner, 1).await.is_err());
        assert!(factory.is_registered_vault(&vault).await?);

        let keeper = Address::new("0xkeeper");
        factory.transfer_vault_ownership(&vault, &keeper).await?;
        assert_eq!(factory.owner_of(&vault).await, Some(keeper));
        Ok(())
    }
}
