//! Human-readable durations for config files: `"500ms"`, `"30s"`, `"5m"`, `"1h"`, `"1d"`.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationError {
    #[error("empty duration")]
    Empty,

    #[error("invalid number in duration '{0}'")]
    Number(String),

    #[error("unknown duration unit '{unit}' in '{input}'")]
    Unit { input: String, unit: String },

    #[error("duration '{0}' is too large")]
    Overflow(String),
}

const MILLIS_PER_UNIT: &[(&str, u64)] = &[
    ("ms", 1),
    ("s", 1_000),
    ("m", 60_000),
    ("h", 3_600_000),
    ("d", 86_400_000),
];

/// Parse `"<digits><unit>"`. A bare number is taken as seconds.
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(DurationError::Empty);
    }

    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| DurationError::Number(input.to_string()))?;

    let unit = unit.trim().to_ascii_lowercase();
    let unit = if unit.is_empty() { "s" } else { unit.as_str() };
    let multiplier = MILLIS_PER_UNIT
        .iter()
        .find(|(name, _)| *name == unit)
        .map(|(_, millis)| *millis)
        .ok_or_else(|| DurationError::Unit {
            input: input.to_string(),
            unit: unit.to_string(),
        })?;

    value
        .checked_mul(multiplier)
        .map(Duration::from_millis)
        .ok_or_else(|| DurationError::Overflow(input.to_string()))
}

/// Format with the largest unit that divides the duration evenly
pub fn format_duration(duration: &Duration) -> String {
    let millis = duration.as_millis() as u64;
    if millis == 0 {
        return "0s".to_string();
    }
    MILLIS_PER_UNIT
        .iter()
        .rev()
        .find(|(_, per)| millis % per == 0)
        .map(|(unit, per)| format!("{}{}", millis / per, unit))
        .unwrap_or_else(|| format!("{}ms", millis))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(serde::de::Error::custom)
}

pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format_duration(duration))
}
