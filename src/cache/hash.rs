//! Payload normalization and content hashing for change detection.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::CacheError;

/// Digest used to tell real content changes from no-op refreshes.
///
/// Only needs collision resistance adequate for change detection.
pub trait ContentHasher: Send + Sync {
  fn digest(&self, normalized: &[u8]) -> String;
}

/// Hex-encoded SHA-256.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl ContentHasher for Sha256Hasher {
  fn digest(&self, normalized: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized);
    hex::encode(hasher.finalize())
  }
}

/// A payload in canonical form together with its serialized bytes.
#[derive(Debug, Clone)]
pub struct NormalizedPayload {
  pub value: Value,
  pub canonical: String,
}

/// Normalize a fetched payload.
///
/// The payload must be a JSON object. Object keys are sorted and string values trimmed,
/// so whitespace and key-order noise from the source never registers as a change.
pub fn normalize_payload(key: &str, raw: Value) -> Result<NormalizedPayload, CacheError> {
  let map = match raw {
    Value::Object(map) => map,
    Value::Null => return Err(CacheError::normalization(key, "payload is empty")),
    other => {
      return Err(CacheError::normalization(
        key,
        format!("payload must be an object, got {}", kind(&other)),
      ))
    }
  };
  if map.is_empty() {
    return Err(CacheError::normalization(key, "payload object has no fields"));
  }

  let value = canonicalize(Value::Object(map));
  let canonical = serde_json::to_string(&value)
    .map_err(|e| CacheError::normalization(key, format!("failed to serialize payload: {}", e)))?;
  Ok(NormalizedPayload { value, canonical })
}

fn canonicalize(value: Value) -> Value {
  match value {
    Value::String(s) => Value::String(s.trim().to_string()),
    Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
    Value::Object(map) => {
      let mut entries: Vec<(String, Value)> = map.into_iter().collect();
      entries.sort_by(|a, b| a.0.cmp(&b.0));
      let sorted: Map<String, Value> = entries
        .into_iter()
        .map(|(k, v)| (k, canonicalize(v)))
        .collect();
      Value::Object(sorted)
    }
    other => other,
  }
}

fn kind(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "bool",
    Value::Number(_) => "number",
    Value::String(_) => "string",
    Value::Array(_) => "array",
    Value::Object(_) => "object",
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn hash(raw: Value) -> String {
    let normalized = normalize_payload("k", raw).unwrap();
    Sha256Hasher.digest(normalized.canonical.as_bytes())
  }

  #[test]
  fn test_hash_ignores_key_order_and_padding() {
    let a = hash(json!({"title": "Sepse", "summary": "Choque séptico"}));
    let b = hash(json!({"summary": "  Choque séptico ", "title": "Sepse"}));
    assert_eq!(a, b);
  }

  #[test]
  fn test_hash_detects_real_change() {
    let a = hash(json!({"title": "Sepse", "dose": 30}));
    let b = hash(json!({"title": "Sepse", "dose": 20}));
    assert_ne!(a, b);
  }

  #[test]
  fn test_hash_format() {
    let h = hash(json!({"title": "x"}));
    assert_eq!(h.len(), 64);
    assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
  }

  #[test]
  fn test_non_object_payload_is_rejected() {
    for raw in [json!(null), json!("text"), json!([1, 2]), json!({})] {
      let err = normalize_payload("asma", raw).unwrap_err();
      assert!(matches!(err, CacheError::NormalizationFailure { .. }));
    }
  }
}
