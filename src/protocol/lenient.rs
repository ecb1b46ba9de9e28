//! Number-or-string deserialization helpers.
//!
//! The gateway is inconsistent about numeric fields: `code`, `requestId` and
//! address ids arrive either as JSON numbers or as numeric strings.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// A JSON value that should be read as a number.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum Numeric {
    Unsigned(u64),
    Signed(i64),
    Float(f64),
    Text(String),
}

impl Numeric {
    /// Returns the value as `i64`, if it is integral.
    pub(crate) fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Unsigned(v) => i64::try_from(*v).ok(),
            Self::Signed(v) => Some(*v),
            Self::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            Self::Float(_) => None,
            Self::Text(s) => s.trim().parse().ok(),
        }
    }

    /// Returns the value as `u64`, if it is a non-negative integer.
    pub(crate) fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Unsigned(v) => Some(*v),
            Self::Text(s) => s.trim().parse().ok(),
            other => other.as_i64().and_then(|v| u64::try_from(v).ok()),
        }
    }
}

/// Deserializes an optional integer that may be encoded as a string.
///
/// Unparseable values become `None` rather than failing the whole frame.
pub(crate) fn opt_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Numeric>::deserialize(deserializer)?;
    Ok(value.and_then(|n| n.as_i64()))
}

/// Deserializes an optional non-negative id that may be encoded as a string.
///
/// Empty strings, garbage and non-scalar values become `None`.
pub(crate) fn opt_id<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: From<u64>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let raw = match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64)),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    Ok(raw.map(T::from))
}
