/// Full-chain verification.
///
/// Structural problems are data, not errors: every violation is collected
/// so a single pass reports how broken a chain is.
use serde::Serialize;
use tracing::error;

use super::block::Block;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChainViolation {
    /// Stored hash differs from the hash recomputed from stored fields.
    HashMismatch {
        index: u64,
        stored: String,
        computed: String,
    },
    /// `previousHash` does not equal the predecessor's stored hash.
    ChainLinkBroken {
        index: u64,
        previous_hash: String,
        expected: String,
    },
    /// Stored indices are not dense from zero.
    IndexDiscontinuity { index: u64, expected: u64 },
    /// The stored payload is not a valid block payload.
    InvalidPayload { index: u64, reason: String },
}

impl ChainViolation {
    /// Index of the block the violation refers to.
    pub fn index(&self) -> u64 {
        match self {
            ChainViolation::HashMismatch { index, .. }
            | ChainViolation::ChainLinkBroken { index, .. }
            | ChainViolation::IndexDiscontinuity { index, .. }
            | ChainViolation::InvalidPayload { index, .. } => *index,
        }
    }
}

impl std::fmt::Display for ChainViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainViolation::HashMismatch { index, .. } => {
                write!(f, "Block {index}: Hash mismatch")
            }
            ChainViolation::ChainLinkBroken {
                index,
                previous_hash,
                expected,
            } => write!(
                f,
                "Block {index}: Hashchain broken (previousHash: {}..., expected: {}...)",
                short(previous_hash),
                short(expected)
            ),
            ChainViolation::IndexDiscontinuity { index, expected } => {
                write!(f, "Block {index}: Index discontinuity (expected {expected})")
            }
            ChainViolation::InvalidPayload { index, reason } => {
                write!(f, "Block {index}: Invalid payload ({reason})")
            }
        }
    }
}

fn short(h: &str) -> &str {
    h.get(..16).unwrap_or(h)
}

/// Result of verifying the chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    pub valid: bool,
    pub blocks_checked: u64,
    pub violations: Vec<ChainViolation>,
}

impl VerificationReport {
    /// Human-readable error list, one entry per violation.
    pub fn errors(&self) -> Vec<String> {
        self.violations.iter().map(ToString::to_string).collect()
    }

    /// Whether any violation refers to block `index`.
    pub fn references(&self, index: u64) -> bool {
        self.violations.iter().any(|v| v.index() == index)
    }
}

/// Verify an index-ordered sequence of blocks.
pub fn verify_blocks(blocks: &[Block]) -> VerificationReport {
    let mut violations = Vec::new();

    for (position, block) in blocks.iter().enumerate() {
        let expected_index = position as u64;
        if block.index != expected_index {
            violations.push(ChainViolation::IndexDiscontinuity {
                index: block.index,
                expected: expected_index,
            });
        }

        let mut invalid = block.payload().err().map(|e| e.to_string());

        match block.recompute_hash() {
            Ok(computed) if computed != block.hash => {
                error!(
                    index = block.index,
                    stored = %block.hash,
                    computed = %computed,
                    timestamp = block.timestamp,
                    "Block hash mismatch"
                );
                violations.push(ChainViolation::HashMismatch {
                    index: block.index,
                    stored: block.hash.clone(),
                    computed,
                });
            }
            Ok(_) => {}
            Err(e) => {
                invalid.get_or_insert_with(|| e.to_string());
            }
        }

        if let Some(reason) = invalid {
            error!(index = block.index, reason = %reason, "Invalid block payload");
            violations.push(ChainViolation::InvalidPayload {
                index: block.index,
                reason,
            });
        }

        if position > 0 {
            let previous = &blocks[position - 1];
            if block.previous_hash != previous.hash {
                error!(
                    index = block.index,
                    previous_hash = %block.previous_hash,
                    expected = %previous.hash,
                    "Hashchain link broken"
                );
                violations.push(ChainViolation::ChainLinkBroken {
                    index: block.index,
                    previous_hash: block.previous_hash.clone(),
                    expected: previous.hash.clone(),
                });
            }
        }
    }

    VerificationReport {
        valid: violations.is_empty(),
        blocks_checked: blocks.len() as u64,
        violations,
    }
}
