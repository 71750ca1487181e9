/// Canonical encoding of block payloads.
///
/// `CanonicalBytes` is the only input ever fed to the block hash. It is built
/// in two steps:
///
/// 1. **Strip absent values.** `null`, `""`, `{}` and `[]` are removed
///    recursively. Array order is preserved, but an element that becomes
///    empty after stripping is dropped.
/// 2. **Serialize with RFC 8785 (JCS).** Keys sorted, compact separators,
///    deterministic number formatting.
///
/// Two payloads with the same logical content therefore always produce the
/// same bytes, regardless of field insertion order or whether an optional
/// field was written as missing, `null`, or empty.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{ProvenanceError, Result};

/// Bytes produced exclusively by [`CanonicalBytes::new`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalBytes(Vec<u8>);

impl CanonicalBytes {
    /// Canonicalize any serializable value.
    pub fn new(obj: &impl Serialize) -> Result<Self> {
        let value = serde_json::to_value(obj)
            .map_err(|e| ProvenanceError::Canonicalization(e.to_string()))?;
        Self::from_value(value)
    }

    /// Canonicalize an already-built JSON value.
    pub fn from_value(value: Value) -> Result<Self> {
        let stripped = strip_absent(value).unwrap_or(Value::Object(Map::new()));
        let s = serde_jcs::to_string(&stripped)
            .map_err(|e| ProvenanceError::Canonicalization(e.to_string()))?;
        Ok(Self(s.into_bytes()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The canonical form as text. JCS output is always UTF-8.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[u8]> for CanonicalBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Recursively remove absent values. Returns `None` when the value itself
/// is absent after stripping.
pub fn strip_absent(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::Object(map) => {
            let cleaned: Map<String, Value> = map
                .into_iter()
                .filter_map(|(k, v)| strip_absent(v).map(|v| (k, v)))
                .collect();
            (!cleaned.is_empty()).then_some(Value::Object(cleaned))
        }
        Value::Array(items) => {
            let cleaned: Vec<Value> = items.into_iter().filter_map(strip_absent).collect();
            (!cleaned.is_empty()).then_some(Value::Array(cleaned))
        }
        other => Some(other),
    }
}
