use std::fs;
use std::path::Path;

use alloy_json_abi::JsonAbi;
use anyhow::{anyhow, Context};
use serde_json::Value;

/// Loads a JSON ABI from disk.
///
/// Accepts either a bare ABI array or a compiler artifact object with an `abi` field.
pub fn load_abi(abi_path: &Path) -> anyhow::Result<JsonAbi> {
    let json_abi_vec = fs::read(abi_path)
        .with_context(|| format!("Failed to read ABI file {}", abi_path.display()))?;
    parse_abi(&json_abi_vec)
        .with_context(|| format!("Failed to parse ABI file {}", abi_path.display()))
}

pub fn parse_abi(abi_json: &[u8]) -> anyhow::Result<JsonAbi> {
    // Preprocess the JSON to add missing anonymous fields
    let preprocessed_json = preprocess_abi_json(abi_json)?;
    Ok(serde_json::from_value(preprocessed_json)?)
}

/// Extracts the ABI array and marks events without an explicit `anonymous` field as non-anonymous.
pub fn preprocess_abi_json(abi_json: &[u8]) -> anyhow::Result<Value> {
    let raw_value: Value = serde_json::from_slice(abi_json)?;

    let mut abi = match raw_value {
        Value::Array(_) => raw_value,
        Value::Object(mut artifact) => artifact
            .remove("abi")
            .ok_or_else(|| anyhow!("ABI object has no `abi` field"))?,
        _ => return Err(anyhow!("ABI JSON must be an array or an artifact object")),
    };

    if let Value::Array(entries) = &mut abi {
        for entry in entries.iter_mut() {
            if let Value::Object(obj) = entry {
                let is_event = obj.get("type").and_then(Value::as_str) == Some("event");
                if is_event && !obj.contains_key("anonymous") {
                    obj.insert("anonymous".to_string(), Value::Bool(false));
                }
            }
        }
    } else {
        return Err(anyhow!("`abi` field must be an array"));
    }

    Ok(abi)
}
