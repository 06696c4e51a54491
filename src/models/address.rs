use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Invalid address {value:?}: addresses must be non-empty and contain no whitespace")]
pub struct AddressError {
    value: String,
}

/// Normalised account or contract address.
///
/// Addresses are compared case-insensitively, so the inner value is always
/// stored trimmed and lower-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Namespace UUID for deriving deterministic addresses.
    const NAMESPACE: Uuid = Uuid::from_u128(0x4c1f_2b7e_93d0_4a8e_b1c6_5f0e_7a2d_9c34);

    pub fn new(value: impl AsRef<str>) -> Self {
        Self(normalize(value.as_ref()))
    }

    /// Parse an address, rejecting empty values and embedded whitespace.
    pub fn parse(value: impl AsRef<str>) -> Result<Self, AddressError> {
        let normalized = normalize(value.as_ref());
        if normalized.is_empty() || normalized.chars().any(char::is_whitespace) {
            return Err(AddressError {
                value: value.as_ref().to_string(),
            });
        }
        Ok(Self(normalized))
    }

    /// Derive a deterministic address from a list of seed parts.
    /// The same parts always produce the same address.
    pub fn derive(parts: &[&str]) -> Self {
        let seed = parts.join("/");
        let uuid = Uuid::new_v5(&Self::NAMESPACE, seed.as_bytes());
        Self(format!("0x{}", uuid.simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<String> for Address {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.0
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}
