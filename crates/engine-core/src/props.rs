//! Typed access to free-form algorithm properties.

use crate::error::AlgorithmError;
use std::collections::BTreeMap;

pub type Props = BTreeMap<String, serde_json::Value>;

/// Reads a positive integer property. Numbers and numeric strings are
/// accepted; a missing key yields `default`.
pub fn positive_u64(
    algorithm: &str,
    props: &Props,
    key: &str,
    default: Option<u64>,
) -> Result<u64, AlgorithmError> {
    let invalid = |message: &str| AlgorithmError::InvalidProperty {
        name: algorithm.to_string(),
        key: key.to_string(),
        message: message.to_string(),
    };

    let value = match props.get(key) {
        None => return default.ok_or_else(|| invalid("required")),
        Some(serde_json::Value::Number(n)) => n.as_u64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<u64>().ok(),
        Some(_) => None,
    };

    match value {
        Some(0) => Err(invalid("must be greater than zero")),
        Some(v) => Ok(v),
        None => Err(invalid("expected a positive integer")),
    }
}
