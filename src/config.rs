use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use primitive_types::U256;
use serde::{de, Deserialize, Deserializer, Serialize};

use crate::duration::{deserialize_duration, serialize_duration};
use crate::models::{Address, BasketEntry, FeedId};
use crate::pricing::DEFAULT_MAX_TICK_DISTANCE;
use crate::risk::{RiskVariables, DEFAULT_COLLATERAL_FACTOR, DEFAULT_LIQUIDATION_THRESHOLD};

/// Fallback risk variables for assets without explicit configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub default_collateral_factor: u16,
    pub default_liquidation_threshold: u16,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            default_collateral_factor: DEFAULT_COLLATERAL_FACTOR,
            default_liquidation_threshold: DEFAULT_LIQUIDATION_THRESHOLD,
        }
    }
}

impl RiskConfig {
    pub fn default_risk_variables(&self) -> Result<RiskVariables> {
        RiskVariables::new(
            self.default_collateral_factor,
            self.default_liquidation_threshold,
        )
        .context("Invalid [risk] defaults")
    }
}

/// Default number of distinct asset records a vault may hold.
pub const DEFAULT_ASSET_LIMIT: usize = 15;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Maximum number of distinct `(asset, id)` records per vault.
    pub asset_limit: usize,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            asset_limit: DEFAULT_ASSET_LIMIT,
        }
    }
}

/// Default averaging window for pool ticks (5 minutes).
fn default_twat_window() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_max_tick_distance() -> i32 {
    DEFAULT_MAX_TICK_DISTANCE
}

/// Concentrated-liquidity deposit guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiquidityConfig {
    /// Window of the time-weighted average tick positions are checked against.
    #[serde(
        default = "default_twat_window",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub twat_window: Duration,

    /// Largest allowed distance in ticks between a bound and the average tick.
    #[serde(default = "default_max_tick_distance")]
    pub max_tick_distance: i32,
}

impl Default for LiquidityConfig {
    fn default() -> Self {
        Self {
            twat_window: default_twat_window(),
            max_tick_distance: default_max_tick_distance(),
        }
    }
}

/// Display/output formatting configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// If set, rendered values are rounded to this many decimal places.
    ///
    /// This is purely a presentation setting and does not affect calculations.
    pub value_decimals: Option<u32>,

    /// When true, render values with thousands separators.
    pub grouping: bool,

    /// When true and `value_decimals` is set, pad to exactly that many
    /// decimal places.
    pub fixed_decimals: bool,
}

/// A unit of account besides the implicit USD entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseCurrencyEntry {
    pub label: String,
    pub decimals: u8,
    #[serde(default)]
    pub native_asset: Option<Address>,
    pub to_usd_feed: FeedId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleEntry {
    pub feed: FeedId,
    pub decimals: u8,
    pub base_asset: String,
    pub quote_asset: String,
    /// Label of the base currency the quote asset is, if any.
    #[serde(default)]
    pub quote_base_currency: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FungibleEntry {
    pub address: Address,
    pub label: String,
    pub decimals: u8,
    pub oracles: Vec<FeedId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionEntry {
    pub address: Address,
    pub label: String,
    pub id_range_start: u64,
    pub id_range_end: u64,
    pub oracles: Vec<FeedId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemiFungibleEntry {
    pub address: Address,
    pub label: String,
    pub id: u64,
    #[serde(default)]
    pub decimals: u8,
    pub oracles: Vec<FeedId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExposureEntry {
    pub asset: Address,
    /// Cap in raw units. Accepts an integer or a decimal string for values
    /// beyond the TOML integer range.
    #[serde(deserialize_with = "deserialize_u128")]
    pub max: u128,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskVariablesEntry {
    pub asset: Address,
    /// Label of the base currency, `USD` for the implicit entry.
    pub base_currency: String,
    pub collateral_factor: u16,
    pub liquidation_threshold: u16,
}

/// Static answer of a feed, served by the in-memory price feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedEntry {
    pub feed: FeedId,
    #[serde(deserialize_with = "deserialize_i128")]
    pub rate: i128,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawInteger {
    Int(i64),
    Text(String),
}

fn deserialize_u128<'de, D>(deserializer: D) -> Result<u128, D::Error>
where
    D: Deserializer<'de>,
{
    match RawInteger::deserialize(deserializer)? {
        RawInteger::Int(value) => u128::try_from(value).map_err(de::Error::custom),
        RawInteger::Text(value) => value.trim().parse().map_err(de::Error::custom),
    }
}

fn deserialize_u256<'de, D>(deserializer: D) -> Result<U256, D::Error>
where
    D: Deserializer<'de>,
{
    match RawInteger::deserialize(deserializer)? {
        RawInteger::Int(value) => u64::try_from(value)
            .map(U256::from)
            .map_err(de::Error::custom),
        RawInteger::Text(value) => U256::from_dec_str(value.trim())
            .map_err(|e| de::Error::custom(format!("{e:?}"))),
    }
}

fn deserialize_i128<'de, D>(deserializer: D) -> Result<i128, D::Error>
where
    D: Deserializer<'de>,
{
    match RawInteger::deserialize(deserializer)? {
        RawInteger::Int(value) => Ok(i128::from(value)),
        RawInteger::Text(value) => value.trim().parse().map_err(de::Error::custom),
    }
}

/// Application configuration: engine settings plus the asset manifest a
/// registry is assembled from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub risk: RiskConfig,
    pub vault: VaultConfig,
    pub liquidity: LiquidityConfig,
    pub display: DisplayConfig,

    pub base_currencies: Vec<BaseCurrencyEntry>,
    pub oracles: Vec<OracleEntry>,
    pub fungible: Vec<FungibleEntry>,
    pub collections: Vec<CollectionEntry>,
    pub semi_fungible: Vec<SemiFungibleEntry>,
    pub position_managers: Vec<Address>,
    pub exposure: Vec<ExposureEntry>,
    pub risk_variables: Vec<RiskVariablesEntry>,
    pub feeds: Vec<FeedEntry>,
}

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load config from a file, or return default config if file doesn't exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

/// Returns the default config file path: `./basket-vault.toml`.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("basket-vault.toml")
}

/// One `[[entries]]` line of a basket file.
#[derive(Debug, Clone, Deserialize)]
pub struct BasketFileEntry {
    pub asset: Address,
    #[serde(default, deserialize_with = "deserialize_u256")]
    pub id: U256,
    #[serde(deserialize_with = "deserialize_u256")]
    pub amount: U256,
}

/// A basket to value offline, as read by the CLI.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BasketFile {
    pub entries: Vec<BasketFileEntry>,
}

impl BasketFile {
    pub fn load(path: &Path) -> Result<Vec<BasketEntry>> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read basket file: {}", path.display()))?;
        let file: BasketFile = toml::from_str(&content)
            .with_context(|| format!("Failed to parse basket file: {}", path.display()))?;
        Ok(file
            .entries
            .into_iter()
            .map(|e| BasketEntry::new(e.asset, e.id, e.amount))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.risk.default_collateral_factor, 20);
        assert_eq!(config.risk.default_liquidation_threshold, 110);
        assert_eq!(config.vault.asset_limit, 15);
        assert_eq!(config.liquidity.twat_window, Duration::from_secs(300));
        assert_eq!(config.liquidity.max_tick_distance, 16_095);
        assert!(config.fungible.is_empty());
    }

    #[test]
    fn test_load_empty_config() -> Result<()> {
        let dir = TempDir::new()?;
        let config_path = dir.path().join("basket-vault.toml");
        std::fs::File::create(&config_path)?;

        let config = Config::load(&config_path)?;
        assert_eq!(config.vault.asset_limit, DEFAULT_ASSET_LIMIT);
        Ok(())
    }

    #[test]
    fn test_load_engine_sections() -> Result<()> {
        let dir = TempDir::new()?;
        let config_path = dir.path().join("basket-vault.toml");

        let mut file = std::fs::File::create(&config_path)?;
        writeln!(file, "[risk]")?;
        writeln!(file, "default_collateral_factor = 50")?;
        writeln!(file, "[vault]")?;
        writeln!(file, "asset_limit = 3")?;
        writeln!(file, "[liquidity]")?;
        writeln!(file, "twat_window = \"10m\"")?;

        let config = Config::load(&config_path)?;
        assert_eq!(config.risk.default_collateral_factor, 50);
        assert_eq!(config.risk.default_liquidation_threshold, 110);
        assert_eq!(config.vault.asset_limit, 3);
        assert_eq!(config.liquidity.twat_window, Duration::from_secs(600));
        assert_eq!(config.liquidity.max_tick_distance, 16_095);
        Ok(())
    }

    #[test]
    fn test_load_manifest_sections() -> Result<()> {
        let dir = TempDir::new()?;
        let config_path = dir.path().join("basket-vault.toml");

        let mut file = std::fs::File::create(&config_path)?;
        writeln!(file, "[[exposure]]")?;
        writeln!(file, "asset = \"0xWETH\"")?;
        writeln!(file, "max = \"5000000000000000000000\"")?;
        writeln!(file, "[[exposure]]")?;
        writeln!(file, "asset = \"0xusdc\"")?;
        writeln!(file, "max = 1000000")?;
        writeln!(file, "[[feeds]]")?;
        writeln!(file, "feed = \"eth-usd\"")?;
        writeln!(file, "rate = 300000000000")?;

        let config = Config::load(&config_path)?;
        assert_eq!(config.exposure[0].asset, Address::new("0xweth"));
        assert_eq!(config.exposure[0].max, 5_000_000_000_000_000_000_000);
        assert_eq!(config.exposure[1].max, 1_000_000);
        assert_eq!(config.feeds[0].rate, 300_000_000_000);
        Ok(())
    }

    #[test]
    fn test_invalid_risk_defaults_are_rejected() {
        let config = RiskConfig {
            default_collateral_factor: 120,
            default_liquidation_threshold: 110,
        };
        let err = config.default_risk_variables().unwrap_err();
        assert!(err.to_string().contains("Invalid [risk] defaults"));
    }

    #[test]
    fn test_load_basket_file() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("basket.toml");

        let mut file = std::fs::File::create(&path)?;
        writeln!(file, "[[entries]]")?;
        writeln!(file, "asset = \"0xWETH\"")?;
        writeln!(file, "amount = \"500000000000000000\"")?;
        writeln!(file, "[[entries]]")?;
        writeln!(file, "asset = \"0xpunks\"")?;
        writeln!(file, "id = 42")?;
        writeln!(file, "amount = 1")?;

        let entries = BasketFile::load(&path)?;
        assert_eq!(
            entries,
            vec![
                BasketEntry::new("0xweth", U256::zero(), U256::exp10(17) * U256::from(5u64)),
                BasketEntry::new("0xpunks", U256::from(42u64), U256::one()),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_config_load_or_default_missing_file() -> Result<()> {
        let dir = TempDir::new()?;
        let config_path = dir.path().join("missing.toml");

        let config = Config::load_or_default(&config_path)?;
        assert_eq!(config.vault.asset_limit, DEFAULT_ASSET_LIMIT);
        Ok(())
    }
}
