/// The provenance hashchain.
///
/// ```text
/// genesis ──▶ block 1 ──▶ block 2 ──▶ ... ──▶ tail
///   "0"      prev=h0      prev=h1
/// ```
///
/// Each block commits to its predecessor's hash, so editing any stored
/// block is visible to [`service::ChainService::verify`].
pub mod block;
pub mod payload;
pub mod service;
pub mod verify;

pub use block::Block;
pub use payload::{BlockPayload, Inference, ModelRegistration, ModelUpdate};
pub use service::{ChainService, HistoryEntry, ProvenanceReport};
pub use verify::{ChainViolation, VerificationReport};
