//! SHA-256 over canonical JSON.
//!
//! Canonical form: compact output, object keys sorted recursively. Keys are
//! sorted explicitly instead of relying on `serde_json::Map` ordering, which
//! flips to insertion order whenever `preserve_order` is enabled anywhere in
//! the dependency graph.

use crate::types::SessionMemory;
use serde_json::Value;
use sha2::Digest;
use sha2::Sha256;

/// Render `value` in canonical form.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                if let Some(v) = map.get(key) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Hash of `memory` with its own `integrity_hash` field blanked.
pub fn compute_hash(memory: &SessionMemory) -> anyhow::Result<String> {
    let mut value = serde_json::to_value(memory)?;
    if let Value::Object(map) = &mut value {
        map.insert("integrity_hash".to_string(), Value::String(String::new()));
    }
    Ok(sha256_hex(canonical_json(&value).as_bytes()))
}

/// Fill in `integrity_hash` from the current content.
pub fn seal(memory: &mut SessionMemory) -> anyhow::Result<()> {
    memory.integrity_hash = compute_hash(memory)?;
    Ok(())
}

/// True when the stored hash matches a recomputation.
pub fn is_intact(memory: &SessionMemory) -> bool {
    match compute_hash(memory) {
        Ok(actual) => actual == memory.integrity_hash,
        Err(_) => false,
    }
}
