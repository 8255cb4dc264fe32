use ai_context_hash_rs::sha256_hex;
use serde_json::{Map, Value};

use crate::ManifestError;
use crate::manifest::PolicyManifest;

/// SHA-256 hex over the key-sorted JSON form of the manifest.
pub fn compute_policy_hash(manifest: &PolicyManifest) -> Result<String, ManifestError> {
    let value =
        serde_json::to_value(manifest).map_err(|error| ManifestError::Serialize(error.to_string()))?;
    let canonical = serde_json::to_string(&canonicalize(value))
        .map_err(|error| ManifestError::Serialize(error.to_string()))?;
    Ok(sha256_hex(&canonical))
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (key, inner) in entries {
                sorted.insert(key, canonicalize(inner));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}
