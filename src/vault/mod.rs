//! Per-user vault: live inventory, margin accounting and liquidation.
//!
//! Lifecycle: `Uninitialized → Active → Liquidating → Active → …`. Every
//! liquidation bumps `life`, which never decreases.
//!
//! State-mutating calls commit their own bookkeeping (inventory and registry
//! exposure) before any custody transfer and revert it exactly if a transfer
//! fails. Withdrawals are checked against open debt before anything moves.

mod inventory;
pub mod margin;

pub use inventory::{Inventory, OwnedSet};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use primitive_types::U256;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::collaborators::{AuctionRequest, Custody, Liquidator, TrustedProtocol, VaultFactory};
use crate::config::{Config, DEFAULT_ASSET_LIMIT};
use crate::models::{Address, AssetKind, AssetRef, AssetTransfer, BasketEntry, USD_INDEX};
use crate::pricing::LedgerChange;
use crate::registry::{AssetRegistry, BasketValuation};
use crate::risk::RiskVariables;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultStatus {
    Uninitialized,
    Active,
    Liquidating,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VaultError {
    #[error("Vault is already initialized")]
    AlreadyInitialized,
    #[error("Vault is not initialized")]
    NotInitialized,
    #[error("Caller {0} is not the vault owner")]
    NotOwner(Address),
    #[error("Caller {0} is not the trusted protocol")]
    NotTrustedProtocol(Address),
    #[error("Caller {0} is not the liquidator")]
    NotLiquidator(Address),
    #[error("Caller {0} is not the factory")]
    NotFactory(Address),
    #[error("Vault is being liquidated")]
    Liquidating,
    #[error("Vault is not being liquidated")]
    NotLiquidating,
    #[error("Vault would hold {requested} asset records, limit is {limit}")]
    AssetLimitExceeded { limit: usize, requested: usize },
    #[error("Asset {asset} #{id} is not whitelisted")]
    NotWhitelisted { asset: Address, id: U256 },
    #[error("Invalid transfer of {asset}: {reason}")]
    InvalidTransfer { asset: Address, reason: String },
    #[error("Vault holds {held} of {asset} #{id}, cannot withdraw {requested}")]
    InsufficientBalance {
        asset: Address,
        id: U256,
        held: U256,
        requested: U256,
    },
    #[error("A margin account is already open")]
    MarginAccountOpen,
    #[error("No margin account is open")]
    NoMarginAccount,
    #[error("Margin account still has {0} open debt")]
    OpenDebt(U256),
    #[error("Liquidator {0} is not supported by this vault")]
    UnsupportedLiquidator(Address),
    #[error("Collateral value {collateral} does not cover open debt {debt}")]
    InsufficientCollateral { collateral: U256, debt: U256 },
    #[error("Vault is healthy: value {total_value}, threshold {liquidation_threshold}, debt {debt}")]
    Healthy {
        total_value: U256,
        liquidation_threshold: u16,
        debt: U256,
    },
}

/// Read-only view of a vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VaultSnapshot {
    pub address: Address,
    pub owner: Option<Address>,
    pub life: u32,
    pub status: VaultStatus,
    pub base_currency: usize,
    pub trusted_protocol: Option<Address>,
    pub records: usize,
}

struct VaultState {
    owner: Option<Address>,
    life: u32,
    status: VaultStatus,
    base_currency: usize,
    trusted_protocol: Option<Arc<dyn TrustedProtocol>>,
    allowed_callers: HashSet<Address>,
    inventory: Inventory,
}

impl VaultState {
    fn require_owner(&self, caller: &Address) -> Result<(), VaultError> {
        match &self.owner {
            None => Err(VaultError::NotInitialized),
            Some(owner) if owner == caller => Ok(()),
            Some(_) => Err(VaultError::NotOwner(caller.clone())),
        }
    }

    fn require_active(&self) -> Result<(), VaultError> {
        match self.status {
            VaultStatus::Active => Ok(()),
            VaultStatus::Uninitialized => Err(VaultError::NotInitialized),
            VaultStatus::Liquidating => Err(VaultError::Liquidating),
        }
    }

    fn require_trusted_protocol(&self, caller: &Address) -> Result<(), VaultError> {
        match &self.trusted_protocol {
            Some(protocol) if protocol.address() == caller && self.allowed_callers.contains(caller) => {
                Ok(())
            }
            _ => Err(VaultError::NotTrustedProtocol(caller.clone())),
        }
    }
}

/// Record-level effect of a withdrawal, kept to undo it.
struct Removal {
    kind: AssetKind,
    asset: AssetRef,
}

pub struct Vault {
    address: Address,
    registry: Arc<AssetRegistry>,
    custody: Arc<dyn Custody>,
    factory: Arc<dyn VaultFactory>,
    liquidator: Arc<dyn Liquidator>,
    asset_limit: usize,
    /// Reported when the basket has no value to weight thresholds by.
    fallback_thresholds: RiskVariables,
    state: Mutex<VaultState>,
}

impl Vault {
    pub fn new(
        address: Address,
        registry: Arc<AssetRegistry>,
        custody: Arc<dyn Custody>,
        factory: Arc<dyn VaultFactory>,
        liquidator: Arc<dyn Liquidator>,
    ) -> Self {
        Self {
            address,
            registry,
            custody,
            factory,
            liquidator,
            asset_limit: DEFAULT_ASSET_LIMIT,
            fallback_thresholds: RiskVariables::default(),
            state: Mutex::new(VaultState {
                owner: None,
                life: 0,
                status: VaultStatus::Uninitialized,
                base_currency: USD_INDEX,
                trusted_protocol: None,
                allowed_callers: HashSet::new(),
                inventory: Inventory::default(),
            }),
        }
    }

    pub fn with_asset_limit(mut self, limit: usize) -> Self {
        self.asset_limit = limit;
        self
    }

    /// Apply the `[vault]` asset limit and the `[risk]` defaults as fallback
    /// thresholds.
    pub fn with_config(self, config: &Config) -> Result<Self> {
        let fallback = config.risk.default_risk_variables()?;
        Ok(self
            .with_asset_limit(config.vault.asset_limit)
            .with_fallback_thresholds(fallback))
    }

    /// Thresholds reported for a valueless basket.
    pub fn with_fallback_thresholds(mut self, thresholds: RiskVariables) -> Self {
        self.fallback_thresholds = thresholds;
        self
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub async fn snapshot(&self) -> VaultSnapshot {
        let state = self.state.lock().await;
        VaultSnapshot {
            address: self.address.clone(),
            owner: state.owner.clone(),
            life: state.life,
            status: state.status,
            base_currency: state.base_currency,
            trusted_protocol: state.trusted_protocol.as_ref().map(|p| p.address().clone()),
            records: state.inventory.record_count(),
        }
    }

    /// One-shot activation.
    pub async fn initialize(&self, owner: Address, base_currency: usize) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.status != VaultStatus::Uninitialized {
            return Err(VaultError::AlreadyInitialized.into());
        }
        self.registry.base_currency(base_currency).await?;
        info!(vault = %self.address, owner = %owner, base_currency, "vault initialized");
        state.owner = Some(owner);
        state.base_currency = base_currency;
        state.status = VaultStatus::Active;
        Ok(())
    }

    // ---- inventory ----

    fn validate_transfer(transfer: &AssetTransfer) -> Result<(), VaultError> {
        let entry = &transfer.entry;
        let invalid = |reason: &str| VaultError::InvalidTransfer {
            asset: entry.address.clone(),
            reason: reason.to_string(),
        };
        if entry.amount.is_zero() {
            return Err(invalid("amount is zero"));
        }
        match transfer.kind {
            AssetKind::Fungible if !entry.id.is_zero() => Err(invalid("fungible id must be 0")),
            AssetKind::NonFungible if entry.amount != U256::one() => {
                Err(invalid("non-fungible amount must be 1"))
            }
            _ => Ok(()),
        }
    }

    /// Deposit assets from the owner. Nothing changes unless every transfer
    /// succeeds.
    pub async fn deposit(&self, caller: &Address, transfers: &[AssetTransfer]) -> Result<()> {
        let entries: Vec<BasketEntry> = transfers.iter().map(|t| t.entry.clone()).collect();
        let (change, inserted) = {
            let mut state = self.state.lock().await;
            state.require_owner(caller)?;
            state.require_active()?;
            for transfer in transfers {
                Self::validate_transfer(transfer)?;
            }

            let mut staged = state.inventory.clone();
            let mut inserted = Vec::new();
            for transfer in transfers {
                let asset = transfer.entry.asset_ref();
                if staged.insert(transfer.kind, &asset) {
                    inserted.push(Removal {
                        kind: transfer.kind,
                        asset,
                    });
                }
            }
            if staged.record_count() > self.asset_limit {
                return Err(VaultError::AssetLimitExceeded {
                    limit: self.asset_limit,
                    requested: staged.record_count(),
                }
                .into());
            }
            for entry in &entries {
                if !self.registry.is_whitelisted(&entry.address, entry.id).await? {
                    warn!(vault = %self.address, asset = %entry.address, id = %entry.id, "deposit rejected");
                    return Err(VaultError::NotWhitelisted {
                        asset: entry.address.clone(),
                        id: entry.id,
                    }
                    .into());
                }
            }

            let change = self
                .registry
                .batch_process_deposit(&self.address, &entries)
                .await?;
            state.inventory = staged;
            (change, inserted)
        };

        let mut completed = Vec::with_capacity(transfers.len());
        for transfer in transfers {
            if let Err(err) = self.custody.transfer_in(transfer, caller, &self.address).await {
                warn!(vault = %self.address, asset = %transfer.entry.address, error = %err, "deposit transfer failed");
                self.undo_deposit(caller, &completed, &change, &inserted).await;
                return Err(err.context("Deposit transfer failed"));
            }
            completed.push(transfer.clone());
        }
        info!(vault = %self.address, assets = transfers.len(), "deposit completed");
        Ok(())
    }

    async fn undo_deposit(
        &self,
        owner: &Address,
        completed: &[AssetTransfer],
        change: &LedgerChange,
        inserted: &[Removal],
    ) {
        for transfer in completed {
            if let Err(err) = self.custody.transfer_out(transfer, &self.address, owner).await {
                error!(vault = %self.address, asset = %transfer.entry.address, error = %err, "failed to return deposited asset");
            }
        }
        self.registry.revert_batch(&self.address, change).await;
        let mut state = self.state.lock().await;
        for removal in inserted {
            state.inventory.remove(removal.kind, &removal.asset);
        }
    }

    /// Withdraw assets to the owner. With an open margin account the
    /// remaining basket must still cover the freshly read debt; that check
    /// runs before any bookkeeping or transfer.
    pub async fn withdraw(&self, caller: &Address, transfers: &[AssetTransfer]) -> Result<()> {
        let entries: Vec<BasketEntry> = transfers.iter().map(|t| t.entry.clone()).collect();
        let (change, removed) = {
            let mut state = self.state.lock().await;
            state.require_owner(caller)?;
            state.require_active()?;

            let mut staged = state.inventory.clone();
            let mut removed = Vec::new();
            let mut requested: HashMap<AssetRef, U256> = HashMap::new();
            for transfer in transfers {
                Self::validate_transfer(transfer)?;
                let entry = &transfer.entry;
                let asset = entry.asset_ref();
                let held = if state.inventory.contains(transfer.kind, &asset) {
                    self.live_balance(transfer.kind, &asset).await?
                } else {
                    U256::zero()
                };
                let total = requested.entry(asset.clone()).or_default();
                *total = total.saturating_add(entry.amount);
                if held < *total {
                    return Err(VaultError::InsufficientBalance {
                        asset: entry.address.clone(),
                        id: entry.id,
                        held,
                        requested: *total,
                    }
                    .into());
                }
                if held == *total && staged.remove(transfer.kind, &asset) {
                    removed.push(Removal {
                        kind: transfer.kind,
                        asset,
                    });
                }
            }

            if let Some(protocol) = state.trusted_protocol.clone() {
                let held = self.asset_data(&state.inventory).await?;
                let remaining = remaining_basket(held, &entries);
                let collateral = self
                    .registry
                    .value_basket(&remaining, state.base_currency)
                    .await
                    .context("Failed to value the remaining basket")?
                    .collateral_value;
                let debt = protocol
                    .open_position(&self.address)
                    .await
                    .context("Failed to read open debt")?;
                if collateral < debt {
                    warn!(vault = %self.address, collateral = %collateral, debt = %debt, "withdrawal would leave vault undercollateralized");
                    return Err(VaultError::InsufficientCollateral { collateral, debt }.into());
                }
            }

            let change = self
                .registry
                .batch_process_withdrawal(&self.address, &entries)
                .await?;
            state.inventory = staged;
            (change, removed)
        };

        let mut completed = Vec::with_capacity(transfers.len());
        for transfer in transfers {
            if let Err(err) = self.custody.transfer_out(transfer, &self.address, caller).await {
                warn!(vault = %self.address, asset = %transfer.entry.address, error = %err, "withdrawal transfer failed");
                self.undo_withdrawal(caller, &completed, &change, &removed).await;
                return Err(err.context("Withdrawal transfer failed"));
            }
            completed.push(transfer.clone());
        }
        info!(vault = %self.address, assets = transfers.len(), "withdrawal completed");
        Ok(())
    }

    async fn undo_withdrawal(
        &self,
        owner: &Address,
        completed: &[AssetTransfer],
        change: &LedgerChange,
        removed: &[Removal],
    ) {
        for transfer in completed {
            if let Err(err) = self.custody.transfer_in(transfer, owner, &self.address).await {
                error!(vault = %self.address, asset = %transfer.entry.address, error = %err, "failed to restore withdrawn asset");
            }
        }
        self.registry.revert_batch(&self.address, change).await;
        let mut state = self.state.lock().await;
        for removal in removed {
            state.inventory.insert(removal.kind, &removal.asset);
        }
    }

    async fn live_balance(&self, kind: AssetKind, asset: &AssetRef) -> Result<U256> {
        match kind {
            AssetKind::NonFungible => Ok(U256::one()),
            AssetKind::Fungible | AssetKind::SemiFungible => self
                .custody
                .balance_of(kind, &asset.address, asset.id, &self.address)
                .await
                .with_context(|| format!("Failed to read balance of {}", asset.address)),
        }
    }

    /// Current basket, derived from the stored records and live balances.
    /// Records with a zero balance are skipped.
    pub async fn generate_asset_data(&self) -> Result<Vec<BasketEntry>> {
        let inventory = self.state.lock().await.inventory.clone();
        self.asset_data(&inventory).await
    }

    async fn asset_data(&self, inventory: &Inventory) -> Result<Vec<BasketEntry>> {
        let mut entries = Vec::with_capacity(inventory.record_count());

        for address in inventory.fungible.iter() {
            let asset = AssetRef::fungible(address.clone());
            let balance = self.live_balance(AssetKind::Fungible, &asset).await?;
            if !balance.is_zero() {
                entries.push(BasketEntry::new(address.clone(), U256::zero(), balance));
            }
        }
        for asset in inventory.non_fungible.iter() {
            entries.push(BasketEntry::new(asset.address.clone(), asset.id, U256::one()));
        }
        for asset in inventory.semi_fungible.iter() {
            let balance = self.live_balance(AssetKind::SemiFungible, asset).await?;
            if !balance.is_zero() {
                entries.push(BasketEntry::new(asset.address.clone(), asset.id, balance));
            }
        }
        debug!(vault = %self.address, entries = entries.len(), "asset data generated");
        Ok(entries)
    }

    // ---- margin account ----

    async fn trusted_protocol(&self) -> Option<Arc<dyn TrustedProtocol>> {
        self.state.lock().await.trusted_protocol.clone()
    }

    pub async fn open_trusted_margin_account(
        &self,
        caller: &Address,
        protocol: Arc<dyn TrustedProtocol>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        state.require_owner(caller)?;
        state.require_active()?;
        if state.trusted_protocol.is_some() {
            return Err(VaultError::MarginAccountOpen.into());
        }

        let terms = protocol
            .open_margin_account(&self.address)
            .await
            .context("Trusted protocol refused the margin account")?;
        if &terms.liquidator != self.liquidator.address() {
            return Err(VaultError::UnsupportedLiquidator(terms.liquidator).into());
        }
        self.registry.base_currency(terms.base_currency).await?;

        info!(
            vault = %self.address,
            protocol = %protocol.address(),
            base_currency = terms.base_currency,
            "margin account opened"
        );
        state.base_currency = terms.base_currency;
        state.allowed_callers.insert(protocol.address().clone());
        state.trusted_protocol = Some(protocol);
        Ok(())
    }

    pub async fn close_trusted_margin_account(&self, caller: &Address) -> Result<()> {
        let mut state = self.state.lock().await;
        state.require_owner(caller)?;
        let protocol = state
            .trusted_protocol
            .clone()
            .ok_or(VaultError::NoMarginAccount)?;
        let debt = protocol
            .open_position(&self.address)
            .await
            .context("Failed to read open debt")?;
        if !debt.is_zero() {
            return Err(VaultError::OpenDebt(debt).into());
        }
        state.allowed_callers.remove(protocol.address());
        state.trusted_protocol = None;
        info!(vault = %self.address, protocol = %protocol.address(), "margin account closed");
        Ok(())
    }

    pub async fn set_base_currency(&self, caller: &Address, base_currency: usize) -> Result<()> {
        let mut state = self.state.lock().await;
        state.require_owner(caller)?;
        if state.trusted_protocol.is_some() {
            return Err(VaultError::MarginAccountOpen.into());
        }
        self.registry.base_currency(base_currency).await?;
        state.base_currency = base_currency;
        Ok(())
    }

    /// Whether the trusted protocol may lend `amount` more against this vault.
    pub async fn increase_margin_position(&self, caller: &Address, amount: U256) -> Result<bool> {
        {
            let state = self.state.lock().await;
            state.require_trusted_protocol(caller)?;
            state.require_active()?;
        }
        let free = self.free_margin().await?;
        let allowed = free >= amount;
        debug!(vault = %self.address, amount = %amount, free_margin = %free, allowed, "margin increase requested");
        Ok(allowed)
    }

    /// Reducing debt only improves health and is always allowed.
    pub async fn decrease_margin_position(&self, caller: &Address, amount: U256) -> Result<bool> {
        self.state.lock().await.require_trusted_protocol(caller)?;
        debug!(vault = %self.address, amount = %amount, "margin decrease");
        Ok(true)
    }

    // ---- valuation ----

    pub async fn base_currency(&self) -> usize {
        self.state.lock().await.base_currency
    }

    async fn valuation(&self) -> Result<BasketValuation> {
        let entries = self.generate_asset_data().await?;
        let base_currency = self.base_currency().await;
        self.registry.value_basket(&entries, base_currency).await
    }

    pub async fn vault_value(&self) -> Result<U256> {
        Ok(self.valuation().await?.total_value)
    }

    pub async fn collateral_value(&self) -> Result<U256> {
        Ok(self.valuation().await?.collateral_value)
    }

    /// Open debt reported by the trusted protocol; zero without one.
    pub async fn used_margin(&self) -> Result<U256> {
        match self.trusted_protocol().await {
            Some(protocol) => protocol
                .open_position(&self.address)
                .await
                .context("Failed to read open debt"),
            None => Ok(U256::zero()),
        }
    }

    pub async fn free_margin(&self) -> Result<U256> {
        let collateral = self.collateral_value().await?;
        let used = self.used_margin().await?;
        Ok(margin::free_margin(collateral, used))
    }

    /// Live value-weighted thresholds, or the fallback for a valueless basket.
    pub async fn margin_thresholds(&self) -> Result<RiskVariables> {
        let valuation = self.valuation().await?;
        Ok(self.thresholds_or_fallback(&valuation))
    }

    fn thresholds_or_fallback(&self, valuation: &BasketValuation) -> RiskVariables {
        valuation.thresholds.unwrap_or(self.fallback_thresholds)
    }

    pub async fn is_healthy(&self) -> Result<bool> {
        let valuation = self.valuation().await?;
        let thresholds = self.thresholds_or_fallback(&valuation);
        let debt = self.used_margin().await?;
        Ok(!margin::is_liquidatable(
            valuation.total_value,
            thresholds.liquidation_threshold,
            debt,
        )?)
    }

    // ---- liquidation ----

    /// Hand an unhealthy vault to the liquidator.
    pub async fn liquidate(&self, keeper: &Address) -> Result<()> {
        self.state.lock().await.require_active()?;

        let valuation = self.valuation().await?;
        let thresholds = self.thresholds_or_fallback(&valuation);
        let debt = self.used_margin().await?;
        if !margin::is_liquidatable(valuation.total_value, thresholds.liquidation_threshold, debt)? {
            return Err(VaultError::Healthy {
                total_value: valuation.total_value,
                liquidation_threshold: thresholds.liquidation_threshold,
                debt,
            }
            .into());
        }

        let liquidator = self.liquidator.address().clone();
        let mut state = self.state.lock().await;
        state.require_active()?;
        let owner = state.owner.clone().ok_or(VaultError::NotInitialized)?;
        let request = AuctionRequest {
            vault: self.address.clone(),
            life: state.life,
            keeper: keeper.clone(),
            owner,
            debt,
            liquidation_threshold: thresholds.liquidation_threshold,
            base_currency: state.base_currency,
        };

        self.liquidator
            .start_auction(request.clone())
            .await
            .context("Liquidator refused to start the auction")?;
        self.factory
            .transfer_vault_ownership(&self.address, &liquidator)
            .await
            .context("Factory failed to hand the vault to the liquidator")?;

        state.status = VaultStatus::Liquidating;
        state.life += 1;
        state.owner = Some(liquidator);
        info!(
            vault = %self.address,
            keeper = %keeper,
            life = request.life,
            debt = %debt,
            total_value = %valuation.total_value,
            "vault liquidation started"
        );
        Ok(())
    }

    /// Return a liquidated vault to service under `new_owner`.
    pub async fn conclude_liquidation(&self, caller: &Address, new_owner: &Address) -> Result<()> {
        if caller != self.liquidator.address() {
            return Err(VaultError::NotLiquidator(caller.clone()).into());
        }
        let mut state = self.state.lock().await;
        if state.status != VaultStatus::Liquidating {
            return Err(VaultError::NotLiquidating.into());
        }
        self.factory
            .transfer_vault_ownership(&self.address, new_owner)
            .await
            .context("Factory failed to transfer the vault")?;
        state.owner = Some(new_owner.clone());
        state.status = VaultStatus::Active;
        state.trusted_protocol = None;
        state.allowed_callers.clear();
        info!(vault = %self.address, owner = %new_owner, life = state.life, "liquidation concluded");
        Ok(())
    }

    /// Ownership changes are driven by the factory.
    pub async fn transfer_ownership(&self, caller: &Address, new_owner: &Address) -> Result<()> {
        if caller != self.factory.address() {
            return Err(VaultError::NotFactory(caller.clone()).into());
        }
        let mut state = self.state.lock().await;
        if state.owner.is_none() {
            return Err(VaultError::NotInitialized.into());
        }
        info!(vault = %self.address, owner = %new_owner, "ownership transferred");
        state.owner = Some(new_owner.clone());
        Ok(())
    }
}

/// Basket left once `withdrawn` is taken out of `held`.
fn remaining_basket(mut held: Vec<BasketEntry>, withdrawn: &[BasketEntry]) -> Vec<BasketEntry> {
    for out in withdrawn {
        if let Some(entry) = held
            .iter_mut()
            .find(|entry| entry.address == out.address && entry.id == out.id)
        {
            entry.amount = entry.amount.saturating_sub(out.amount);
        }
    }
    held.retain(|entry| !entry.amount.is_zero());
    held
}
