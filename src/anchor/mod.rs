/// External-ledger anchoring.
///
/// Block hashes are batched into a Merkle root which is committed to an
/// independently-trusted ledger, so rewriting local history becomes
/// externally detectable.
///
/// ```text
/// append ──▶ MerkleAnchorEngine ──▶ ExternalLedgerClient::submit ──▶ Anchor (pending)
///                                                                       │
/// AnchorConfirmationPoller ──▶ ExternalLedgerClient::get_receipt ───────┘──▶ confirmed
/// ```
pub mod engine;
pub mod ethereum;
pub mod poller;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Identifiers returned after a transaction was accepted by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedTx {
    pub tx_hash: String,
    /// Known only if the transaction was already mined at submit time.
    pub block_number: Option<u64>,
    pub chain_id: u64,
}

/// A mined transaction's receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: String,
    pub block_number: Option<u64>,
    /// False if the transaction was mined but reverted.
    pub success: bool,
}

/// Client for the external ledger. Signing and submission are delegated
/// entirely to the implementation.
#[async_trait]
pub trait ExternalLedgerClient: Send + Sync {
    /// Name of the ledger (e.g., "ethereum").
    fn name(&self) -> &str;

    /// Send a zero-value transaction carrying `payload` as data.
    async fn submit(&self, payload: &[u8]) -> Result<SubmittedTx>;

    /// Fetch a transaction receipt. `Ok(None)` means not yet mined.
    async fn get_receipt(&self, tx_hash: &str) -> Result<Option<TxReceipt>>;
}

/// Bound an external-ledger call by `limit`.
pub(crate) async fn with_timeout<T>(
    operation: &'static str,
    limit: std::time::Duration,
    call: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| crate::error::ProvenanceError::LedgerTimeout {
            operation,
            seconds: limit.as_secs(),
        })?
}
