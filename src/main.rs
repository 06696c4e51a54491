use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use primitive_types::U256;
use serde::Serialize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use basket_vault::config::{default_config_path, BasketFile, Config};
use basket_vault::format::format_value_display;
use basket_vault::models::{Address, BaseCurrency};
use basket_vault::registry::RegistryBuilder;

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_COMMIT_HASH"), ")");

#[derive(Parser)]
#[command(name = "basket-vault")]
#[command(about = "Value collateral baskets against a configured asset registry")]
#[command(version = VERSION)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the resolved configuration as JSON
    Config,
    /// List the registered units of account
    BaseCurrencies,
    /// Check whether an asset instance may be deposited
    Whitelisted {
        asset: Address,
        #[arg(long, default_value = "0")]
        id: String,
    },
    /// Value a basket file
    Value {
        /// TOML file with `[[entries]]` of asset, id and amount
        #[arg(long)]
        basket: PathBuf,
        /// Unit of account label (defaults to USD)
        #[arg(long, default_value = "USD")]
        base_currency: String,
    },
}

#[derive(Serialize)]
struct BaseCurrencyLine {
    index: usize,
    label: String,
    decimals: u8,
    native_asset: Option<String>,
}

#[derive(Serialize)]
struct WhitelistReport {
    asset: String,
    id: String,
    whitelisted: bool,
}

#[derive(Serialize)]
struct ValueLine {
    asset: String,
    id: String,
    amount: String,
    value: String,
    collateral_factor: u16,
    liquidation_threshold: u16,
}

#[derive(Serialize)]
struct ValueReport {
    base_currency: String,
    lines: Vec<ValueLine>,
    total_value: String,
    collateral_value: String,
    collateral_factor: Option<u16>,
    liquidation_threshold: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_level(true)
                .json(),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load config: {}", cli.config.display()))?;

    match cli.command {
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Command::BaseCurrencies => {
            let registry = RegistryBuilder::new(config).build().await?;
            let lines: Vec<BaseCurrencyLine> = registry
                .base_currencies()
                .await
                .into_iter()
                .map(|bc| BaseCurrencyLine {
                    index: bc.index,
                    label: bc.label,
                    decimals: bc.decimals,
                    native_asset: bc.native_asset.map(|a| a.to_string()),
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&lines)?);
        }
        Command::Whitelisted { asset, id } => {
            let id = U256::from_dec_str(&id).map_err(|e| anyhow::anyhow!("Invalid id {id}: {e:?}"))?;
            let registry = RegistryBuilder::new(config).build().await?;
            let report = WhitelistReport {
                whitelisted: registry.is_whitelisted(&asset, id).await?,
                asset: asset.to_string(),
                id: id.to_string(),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Value {
            basket,
            base_currency,
        } => {
            let entries = BasketFile::load(&basket)?;
            let display = config.display.clone();
            let registry = RegistryBuilder::new(config).build().await?;
            let index = registry.base_currency_index(&base_currency).await?;
            let bc: BaseCurrency = registry.base_currency(index).await?;
            let valuation = registry.value_basket(&entries, index).await?;

            let render = |v: U256| format_value_display(v, u32::from(bc.decimals), &display);
            let report = ValueReport {
                base_currency: bc.label.clone(),
                lines: entries
                    .iter()
                    .zip(&valuation.values)
                    .map(|(entry, line)| ValueLine {
                        asset: entry.address.to_string(),
                        id: entry.id.to_string(),
                        amount: entry.amount.to_string(),
                        value: render(line.value),
                        collateral_factor: line.collateral_factor,
                        liquidation_threshold: line.liquidation_threshold,
                    })
                    .collect(),
                total_value: render(valuation.total_value),
                collateral_value: render(valuation.collateral_value),
                collateral_factor: valuation.thresholds.map(|t| t.collateral_factor),
                liquidation_threshold: valuation.thresholds.map(|t| t.liquidation_threshold),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
