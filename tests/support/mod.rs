#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use basket_vault::collaborators::{
    FixedDebtProtocol, MarginAccountTerms, MemoryCustody, MemoryFactory, RecordingLiquidator,
};
use basket_vault::config::Config;
use basket_vault::math::WAD;
use basket_vault::models::{Address, USD_INDEX};
use basket_vault::oracle::MemoryPriceFeed;
use basket_vault::registry::{AssetRegistry, RegistryBuilder};
use basket_vault::vault::Vault;
use primitive_types::U256;

pub const USDC_INDEX: usize = 1;
pub const ETH_INDEX: usize = 2;

/// Registry manifest shared by the integration tests.
///
/// Prices: ETH 3000 USD, USDC 1 USD, LINK 0.005 ETH, punks floor 50000 USD,
/// tickets 25 USD, AAA and BBB 1 USD.
pub const MANIFEST: &str = r#"
[[base_currencies]]
label = "USDC"
decimals = 6
native_asset = "0xusdc"
to_usd_feed = "usdc-usd"

[[base_currencies]]
label = "ETH"
decimals = 18
native_asset = "0xweth"
to_usd_feed = "eth-usd"

[[oracles]]
feed = "eth-usd"
decimals = 8
base_asset = "ETH"
quote_asset = "USD"

[[oracles]]
feed = "usdc-usd"
decimals = 8
base_asset = "USDC"
quote_asset = "USD"

[[oracles]]
feed = "link-eth"
decimals = 18
base_asset = "LINK"
quote_asset = "ETH"
quote_base_currency = "ETH"

[[oracles]]
feed = "punks-usd"
decimals = 18
base_asset = "PUNK"
quote_asset = "USD"

[[oracles]]
feed = "ticket-usd"
decimals = 8
base_asset = "TICKET"
quote_asset = "USD"

[[oracles]]
feed = "aaa-usd"
decimals = 18
base_asset = "AAA"
quote_asset = "USD"

[[oracles]]
feed = "bbb-usd"
decimals = 18
base_asset = "BBB"
quote_asset = "USD"

[[fungible]]
address = "0xweth"
label = "ETH"
decimals = 18
oracles = ["eth-usd"]

[[fungible]]
address = "0xusdc"
label = "USDC"
decimals = 6
oracles = ["usdc-usd"]

[[fungible]]
address = "0xlink"
label = "LINK"
decimals = 18
oracles = ["link-eth", "eth-usd"]

[[fungible]]
address = "0xaaa"
label = "AAA"
decimals = 18
oracles = ["aaa-usd"]

[[fungible]]
address = "0xbbb"
label = "BBB"
decimals = 18
oracles = ["bbb-usd"]

[[collections]]
address = "0xpunks"
label = "PUNK"
id_range_start = 0
id_range_end = 9999
oracles = ["punks-usd"]

[[semi_fungible]]
address = "0xtickets"
label = "TICKET"
id = 7
oracles = ["ticket-usd"]

[[exposure]]
asset = "0xweth"
max = "1000000000000000000000"

[[exposure]]
asset = "0xusdc"
max = 1000000000000

[[exposure]]
asset = "0xlink"
max = "1000000000000000000000000"

[[exposure]]
asset = "0xpunks"
max = 10

[[exposure]]
asset = "0xtickets"
max = 100

[[exposure]]
asset = "0xaaa"
max = "1000000000000000000000"

[[exposure]]
asset = "0xbbb"
max = "1000000000000000000000"

[[risk_variables]]
asset = "0xweth"
base_currency = "USD"
collateral_factor = 80
liquidation_threshold = 110

[[risk_variables]]
asset = "0xusdc"
base_currency = "USD"
collateral_factor = 90
liquidation_threshold = 105

[[feeds]]
feed = "eth-usd"
rate = 300000000000

[[feeds]]
feed = "usdc-usd"
rate = 100000000

[[feeds]]
feed = "link-eth"
rate = 5000000000000000

[[feeds]]
feed = "punks-usd"
rate = "50000000000000000000000"

[[feeds]]
feed = "ticket-usd"
rate = 2500000000

[[feeds]]
feed = "aaa-usd"
rate = 1000000000000000000

[[feeds]]
feed = "bbb-usd"
rate = 1000000000000000000
"#;

pub fn manifest() -> Result<Config> {
    Ok(toml::from_str(MANIFEST)?)
}

pub fn addr(name: &str) -> Address {
    Address::new(format!("0x{name}"))
}

pub fn wad(whole: u64) -> U256 {
    U256::from(whole) * WAD
}

/// Price feed pre-loaded with the manifest's `[[feeds]]` answers.
pub async fn manifest_feed(config: &Config) -> Arc<MemoryPriceFeed> {
    let feed = Arc::new(MemoryPriceFeed::new());
    for entry in &config.feeds {
        feed.set_rate(entry.feed.clone(), entry.rate).await;
    }
    feed
}

pub struct RegistryFixture {
    pub feed: Arc<MemoryPriceFeed>,
    pub factory: Arc<MemoryFactory>,
    pub registry: Arc<AssetRegistry>,
}

pub async fn registry() -> Result<RegistryFixture> {
    let config = manifest()?;
    let feed = manifest_feed(&config).await;
    let factory = Arc::new(MemoryFactory::new(addr("factory")));
    let registry = RegistryBuilder::new(config)
        .with_price_feed(feed.clone())
        .with_factory(factory.clone())
        .build()
        .await?;
    Ok(RegistryFixture {
        feed,
        factory,
        registry,
    })
}

pub struct VaultFixture {
    pub feed: Arc<MemoryPriceFeed>,
    pub factory: Arc<MemoryFactory>,
    pub registry: Arc<AssetRegistry>,
    pub custody: Arc<MemoryCustody>,
    pub liquidator: Arc<RecordingLiquidator>,
    pub protocol: Arc<FixedDebtProtocol>,
    pub owner: Address,
    pub vault: Vault,
}

/// An initialized USD vault whose owner holds 10 WETH, 1000 USDC, punk #42
/// and 10 tickets.
pub async fn vault() -> Result<VaultFixture> {
    let RegistryFixture {
        feed,
        factory,
        registry,
    } = registry().await?;
    let owner = addr("owner");
    let address = factory.create_vault(&owner, 0).await?;

    let custody = Arc::new(MemoryCustody::new());
    custody.mint(&owner, &addr("weth"), U256::zero(), wad(10)).await;
    custody
        .mint(&owner, &addr("usdc"), U256::zero(), U256::from(1_000_000_000u64))
        .await;
    custody.mint(&owner, &addr("punks"), U256::from(42u64), U256::one()).await;
    custody.mint(&owner, &addr("tickets"), U256::from(7u64), U256::from(10u64)).await;

    let liquidator = Arc::new(RecordingLiquidator::new(addr("liquidator")));
    let protocol = Arc::new(FixedDebtProtocol::new(
        addr("lender"),
        MarginAccountTerms {
            base_currency: USD_INDEX,
            liquidator: addr("liquidator"),
        },
    ));

    let vault = Vault::new(
        address,
        registry.clone(),
        custody.clone(),
        factory.clone(),
        liquidator.clone(),
    )
    .with_config(&manifest()?)?;
    vault.initialize(owner.clone(), USD_INDEX).await?;

    Ok(VaultFixture {
        feed,
        factory,
        registry,
        custody,
        liquidator,
        protocol,
        owner,
        vault,
    })
}
