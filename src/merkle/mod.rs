pub mod proof;
pub mod tree;

pub use proof::{verify_proof, MerkleProof};
pub use tree::MerkleTree;
