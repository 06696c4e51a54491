mod address;
mod asset;
mod base_currency;
mod id;

pub use address::{Address, AddressError};
pub use asset::{split_basket, AssetKind, AssetRef, AssetTransfer, BasketEntry};
pub use base_currency::{BaseCurrency, USD_INDEX};
pub use id::{FeedId, FeedIdError};
