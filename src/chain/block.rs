/// Blocks and the block hash.
///
/// ```text
/// hash = SHA-256( index ␟ timestamp ␟ canonical(data) ␟ previousHash )
/// ```
///
/// `␟` is U+001F. JSON escapes every control character inside strings, and
/// the other fields are decimal integers or hex digests, so the separator can
/// never appear inside a field.
///
/// `data` is hashed exactly as stored. The typed view is decoded on demand
/// through [`Block::payload`], so a stored payload that no longer decodes,
/// or that carries extra keys, still hashes and is reported by verification.
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::payload::{BlockPayload, ModelRegistration};
use crate::canonical::CanonicalBytes;
use crate::crypto::hash;
use crate::error::Result;

pub const FIELD_SEPARATOR: char = '\u{1f}';

/// `previousHash` of the genesis block.
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Subject identifier of the genesis payload.
pub const GENESIS_SUBJECT: &str = "genesis";

/// A chain block. Immutable once persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub index: u64,
    /// Unix seconds.
    pub timestamp: i64,
    /// Stored payload JSON, normally a serialized [`BlockPayload`].
    pub data: Value,
    pub previous_hash: String,
    pub hash: String,
}

/// Compute the hash of a block from its fields.
pub fn compute_hash(
    index: u64,
    timestamp: i64,
    data: &Value,
    previous_hash: &str,
) -> Result<String> {
    let canonical = CanonicalBytes::from_value(data.clone())?;
    let mut input = Vec::with_capacity(canonical.len() + previous_hash.len() + 48);
    input.extend_from_slice(index.to_string().as_bytes());
    push_separator(&mut input);
    input.extend_from_slice(timestamp.to_string().as_bytes());
    push_separator(&mut input);
    input.extend_from_slice(canonical.as_bytes());
    push_separator(&mut input);
    input.extend_from_slice(previous_hash.as_bytes());
    Ok(hash::sha256_hex(&input))
}

fn push_separator(buf: &mut Vec<u8>) {
    let mut tmp = [0u8; 4];
    buf.extend_from_slice(FIELD_SEPARATOR.encode_utf8(&mut tmp).as_bytes());
}

impl Block {
    /// Build a block and compute its hash.
    pub fn seal(
        index: u64,
        timestamp: i64,
        data: BlockPayload,
        previous_hash: impl Into<String>,
    ) -> Result<Self> {
        let previous_hash = previous_hash.into();
        let data = serde_json::to_value(&data)?;
        let hash = compute_hash(index, timestamp, &data, &previous_hash)?;
        Ok(Self {
            index,
            timestamp,
            data,
            previous_hash,
            hash,
        })
    }

    /// The well-known first block.
    pub fn genesis(timestamp: i64) -> Result<Self> {
        Self::seal(0, timestamp, genesis_payload(), GENESIS_PREVIOUS_HASH)
    }

    /// Recompute the hash from the stored fields.
    pub fn recompute_hash(&self) -> Result<String> {
        compute_hash(self.index, self.timestamp, &self.data, &self.previous_hash)
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }

    /// Decode the typed payload.
    pub fn payload(&self) -> Result<BlockPayload> {
        Ok(serde_json::from_value(self.data.clone())?)
    }

    /// `modelId` of the stored payload, or "" if absent.
    pub fn subject_id(&self) -> &str {
        self.data.get("modelId").and_then(Value::as_str).unwrap_or_default()
    }

    /// `type` tag of the stored payload, or "" if absent.
    pub fn kind(&self) -> &str {
        self.data.get("type").and_then(Value::as_str).unwrap_or_default()
    }
}

pub fn genesis_payload() -> BlockPayload {
    BlockPayload::ModelRegistration(ModelRegistration {
        model_id: GENESIS_SUBJECT.to_string(),
        metadata: Some(json!({ "description": "Genesis block" })),
        ..Default::default()
    })
}
