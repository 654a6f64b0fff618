//! # Connection Info Assembler
//!
//! Pure merge of a remote application bag with resolved secret content
//! into the flat connection mapping handed to consumers. Reference keys
//! and internal bookkeeping never leak into the result.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::constants::{INTERNAL_KEY_PREFIX, REQUIRED_OPTIONS, SECRET_FIELDS};

use super::secrets::reference_key;

/// Collapses JSON-encoded scalars to plain text. Writers differ in
/// whether they JSON-encode values, so `"abfss"` and `abfss` must read
/// the same; structured values pass through raw.
fn decode_value(raw: &str) -> String {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::String(inner)) => inner,
        Ok(Value::Number(number)) => number.to_string(),
        Ok(Value::Bool(flag)) => flag.to_string(),
        _ => raw.to_string(),
    }
}

fn is_reference_key(key: &str) -> bool {
    SECRET_FIELDS.iter().any(|field| key == reference_key(field))
}

/// Merges the raw bag with resolved secret fields.
///
/// Resolved values win over raw ones of the same name, so a provider
/// cannot shadow a secret field with a plaintext bag entry.
pub fn assemble(
    raw: &BTreeMap<String, String>,
    resolved: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut connection = BTreeMap::new();
    for (key, value) in raw {
        if is_reference_key(key) || key.starts_with(INTERNAL_KEY_PREFIX) {
            continue;
        }
        connection.insert(key.clone(), decode_value(value));
    }
    for (field, value) in resolved {
        connection.insert(field.clone(), value.clone());
    }
    connection
}

/// Required connection fields that are absent or empty in the assembled
/// mapping. An empty value counts as missing.
pub fn missing_required(connection: &BTreeMap<String, String>) -> Vec<&'static str> {
    REQUIRED_OPTIONS
        .iter()
        .copied()
        .filter(|field| connection.get(*field).is_none_or(String::is_empty))
        .collect()
}
