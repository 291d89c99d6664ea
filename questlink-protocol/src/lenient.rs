//! Forgiving deserializers for numeric and boolean payload fields.
//!
//! Daemons written in loosely typed languages send `1234.5` where a count is
//! expected, or `"42"`, or `-1`. A strict field would reject the whole
//! envelope, so these coerce what they can and turn the rest into `None`.

use questlink_core::NormalizationError;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::debug;

pub(crate) fn u64_opt<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| logged(coerce_u64(&v), &v)))
}

pub(crate) fn u32_opt<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| {
        let coerced = coerce_u64(&v).and_then(|n| u32::try_from(n).ok());
        logged(coerced, &v)
    }))
}

pub(crate) fn bool_opt<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| logged(coerce_bool(&v), &v)))
}

/// Non-negative integers, floats (truncated) and numeric strings.
pub(crate) fn coerce_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().and_then(float_to_u64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(float_to_u64))
        }
        _ => None,
    }
}

pub(crate) fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f == 0.0 => Some(false),
            Some(f) if f == 1.0 => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn float_to_u64(f: f64) -> Option<u64> {
    if f.is_finite() && f >= 0.0 && f < u64::MAX as f64 {
        Some(f.trunc() as u64)
    } else {
        None
    }
}

fn logged<T>(coerced: Option<T>, raw: &Value) -> Option<T> {
    if coerced.is_none() && !raw.is_null() {
        let err = NormalizationError::InvalidField {
            field: "numeric or boolean field",
            value: raw.to_string(),
        };
        debug!(error = %err, "Dropping unusable field");
    }
    coerced
}
