use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Invalid feed id {value:?}: feed ids must be non-empty and contain no whitespace")]
pub struct FeedIdError {
    value: String,
}

/// Identifier of an external price feed (e.g. `"eth-usd"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeedId(String);

impl FeedId {
    pub fn from_string(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Create a feed id, validating that it is a single non-empty token.
    pub fn from_string_checked(value: impl Into<String>) -> Result<Self, FeedIdError> {
        let value = value.into();
        if value.is_empty() || value.chars().any(char::is_whitespace) {
            Err(FeedIdError { value })
        } else {
            Ok(Self(value))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for FeedId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for FeedId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<str> for FeedId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}
