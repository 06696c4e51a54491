//! Human-readable durations like "5m" or "300s" for config files.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{de, Deserialize, Deserializer, Serializer};

const UNITS: [(char, u64); 4] = [('d', 24 * 60 * 60), ('h', 60 * 60), ('m', 60), ('s', 1)];

/// Parse a duration string like "1d", "2h", "5m", "300s".
///
/// The input is case-insensitive and whitespace is trimmed.
///
/// ```
/// use basket_vault::duration::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
/// assert_eq!(parse_duration("300s").unwrap(), Duration::from_secs(300));
/// ```
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim().to_lowercase();
    let Some(unit) = s.chars().last() else {
        anyhow::bail!("Duration is empty");
    };
    let Some((_, scale)) = UNITS.iter().find(|(suffix, _)| *suffix == unit) else {
        anyhow::bail!("Duration must end with d, h, m, or s");
    };

    let num: u64 = s[..s.len() - 1]
        .parse()
        .with_context(|| format!("Invalid number in duration {s:?}"))?;
    let secs = num.checked_mul(*scale).context("Duration is too large")?;
    Ok(Duration::from_secs(secs))
}

/// Format a duration with the largest unit that divides it evenly.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    for (suffix, scale) in UNITS {
        if secs >= scale && secs % scale == 0 {
            return format!("{}{suffix}", secs / scale);
        }
    }
    format!("{secs}s")
}

/// Serde deserializer for duration strings.
///
/// Use with `#[serde(deserialize_with = "deserialize_duration")]`.
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(de::Error::custom)
}

/// Serde serializer writing the [`format_duration`] form.
pub fn serialize_duration<S>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format_duration(*d))
}
