/// Sorted-pair keccak-256 Merkle tree over block hashes.
///
///   pair_hash(a, b) = keccak256(min(a, b) || max(a, b))
///
/// Leaves are the raw 32-byte block hashes (not re-hashed). Sorting each pair
/// makes a parent independent of which child came first, so inclusion proofs
/// need no left/right flags. A level with an odd number of nodes duplicates
/// its last node. A single leaf is its own root.
use crate::crypto::hash;
use crate::error::Result;

/// Hash two nodes to produce a parent.
pub fn pair_hash(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut input = [0u8; 64];
    input[..32].copy_from_slice(lo);
    input[32..].copy_from_slice(hi);
    hash::keccak256(&input)
}

pub struct MerkleTree {
    /// levels[0] = leaves, levels[last] = [root].
    pub(crate) levels: Vec<Vec<[u8; 32]>>,
}

impl MerkleTree {
    /// Build from leaf hashes.
    pub fn from_leaf_hashes(leaves: Vec<[u8; 32]>) -> Self {
        if leaves.is_empty() {
            return Self {
                levels: vec![vec![]],
            };
        }

        let mut levels = vec![leaves];

        while let Some(current) = levels.last().filter(|l| l.len() > 1) {
            let next: Vec<[u8; 32]> = current
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => pair_hash(left, right),
                    // Odd node: duplicate
                    [last] => pair_hash(last, last),
                    _ => unreachable!("chunks(2) yields one or two nodes"),
                })
                .collect();
            levels.push(next);
        }

        Self { levels }
    }

    /// Build from hex block hashes (with or without `0x`).
    pub fn from_hex_leaves<S: AsRef<str>>(hashes: &[S]) -> Result<Self> {
        let leaves = hashes
            .iter()
            .map(|h| hash::parse_digest(h.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_leaf_hashes(leaves))
    }

    /// Merkle root. None if the tree is empty.
    pub fn root(&self) -> Option<[u8; 32]> {
        self.levels.last()?.first().copied()
    }

    /// Root as `0x`-prefixed hex.
    pub fn root_hex(&self) -> Option<String> {
        self.root().map(|r| hash::to_prefixed_hex(&r))
    }

    pub fn leaf_count(&self) -> usize {
        self.levels.first().map_or(0, |l| l.len())
    }

    pub fn leaves(&self) -> &[[u8; 32]] {
        self.levels.first().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn levels(&self) -> &[Vec<[u8; 32]>] {
        &self.levels
    }
}
