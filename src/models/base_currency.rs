use primitive_types::U256;

use super::{Address, FeedId};

/// Index of the implicit USD unit of account.
pub const USD_INDEX: usize = 0;

/// Unit of account a basket can be valued in.
///
/// Values are computed internally as 18-decimal USD and converted into the
/// unit's native precision by dividing through `unit_correction`
/// (`10^(18 - native decimals)`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseCurrency {
    pub index: usize,
    pub label: String,
    /// Native precision of values reported in this unit.
    pub decimals: u8,
    /// Asset that *is* this unit of account. Holdings of it are valued 1:1.
    pub native_asset: Option<Address>,
    /// Feed quoting one unit of this currency in USD. None only for USD.
    pub to_usd_feed: Option<FeedId>,
    pub to_usd_oracle_unit: U256,
    pub unit_correction: U256,
}

impl BaseCurrency {
    /// The reserved USD entry: no feed, identity conversion.
    pub fn usd() -> Self {
        Self {
            index: USD_INDEX,
            label: "USD".to_string(),
            decimals: 18,
            native_asset: None,
            to_usd_feed: None,
            to_usd_oracle_unit: U256::one(),
            unit_correction: U256::one(),
        }
    }

    pub fn is_usd(&self) -> bool {
        self.index == USD_INDEX
    }
}
