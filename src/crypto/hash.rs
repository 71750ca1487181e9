/// Hashing utilities for the provenance chain.
///
/// Two digests are in use:
/// - SHA-256 for block hashes (stored as lowercase hex, no prefix)
/// - keccak-256 for Merkle pair hashing, so roots can be checked
///   by EVM tooling that commits to the same tree shape
use sha2::{Digest, Sha256};

use crate::error::{ProvenanceError, Result};

/// SHA-256 of arbitrary data.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// SHA-256 as lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// keccak-256 of arbitrary data.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    alloy::primitives::keccak256(data).0
}

/// Hex with a `0x` prefix, the form handed to the external ledger.
pub fn to_prefixed_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Parse a 32-byte digest from hex, with or without a `0x` prefix.
pub fn parse_digest(s: &str) -> Result<[u8; 32]> {
    let raw = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(raw)
        .map_err(|e| ProvenanceError::Serialization(format!("Invalid hex digest '{s}': {e}")))?;
    bytes.try_into().map_err(|v: Vec<u8>| {
        ProvenanceError::Serialization(format!("Digest must be 32 bytes, got {}", v.len()))
    })
}
