/// Merkle inclusion proofs for the sorted-pair tree.
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::tree::{pair_hash, MerkleTree};
use crate::crypto::hash;

/// Proof that a leaf is committed by a root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerkleProof {
    pub leaf_index: usize,
    #[serde(with = "hex_digest")]
    pub leaf_hash: [u8; 32],
    /// Sibling at each level, leaf upwards. Pairs are sorted before hashing,
    /// so no position is recorded.
    #[serde(with = "hex_digests")]
    pub siblings: Vec<[u8; 32]>,
}

mod hex_digest {
    use super::*;

    pub fn serialize<S: Serializer>(d: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hash::to_prefixed_hex(d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let raw = String::deserialize(d)?;
        hash::parse_digest(&raw).map_err(serde::de::Error::custom)
    }
}

mod hex_digests {
    use super::*;

    pub fn serialize<S: Serializer>(v: &[[u8; 32]], s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(v.iter().map(|d| hash::to_prefixed_hex(d)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<[u8; 32]>, D::Error> {
        Vec::<String>::deserialize(d)?
            .iter()
            .map(|raw| hash::parse_digest(raw).map_err(serde::de::Error::custom))
            .collect()
    }
}

impl MerkleTree {
    /// Inclusion proof for the leaf at `index`.
    pub fn prove(&self, index: usize) -> Option<MerkleProof> {
        if index >= self.leaf_count() {
            return None;
        }

        let mut siblings = Vec::new();
        let mut idx = index;

        for level in &self.levels[..self.levels.len().saturating_sub(1)] {
            let sibling_idx = idx ^ 1;
            // Odd level: the last node was paired with itself
            let sibling = level.get(sibling_idx).unwrap_or(&level[idx]);
            siblings.push(*sibling);
            idx /= 2;
        }

        Some(MerkleProof {
            leaf_index: index,
            leaf_hash: self.leaves()[index],
            siblings,
        })
    }
}

/// Verify an inclusion proof against a known root.
pub fn verify_proof(root: &[u8; 32], proof: &MerkleProof) -> bool {
    let computed = proof
        .siblings
        .iter()
        .fold(proof.leaf_hash, |acc, sibling| pair_hash(&acc, sibling));
    &computed == root
}
