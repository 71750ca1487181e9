/// Merkle anchor engine.
///
/// After each append, checks whether enough blocks have accumulated since
/// the last anchor; if so, commits the Merkle root over every block hash
/// `0..=tail` to the external ledger and records a pending anchor.
///
/// Evaluation re-reads persisted state every time, so a failed submission
/// is simply retried by the next qualifying append.
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{with_timeout, ExternalLedgerClient};
use crate::config::AnchorPolicy;
use crate::error::{ProvenanceError, Result};
use crate::merkle::MerkleTree;
use crate::store::{Anchor, LedgerStore, NewAnchor};

/// What an evaluation did.
#[derive(Debug, Clone, PartialEq)]
pub enum AnchorOutcome {
    /// The chain has no blocks yet.
    NoBlocks,
    /// Fewer than `threshold` blocks since the last anchor.
    BelowThreshold { unanchored: u64, threshold: u64 },
    /// A new pending anchor was recorded.
    Anchored(Anchor),
}

pub struct MerkleAnchorEngine {
    store: Arc<dyn LedgerStore>,
    ledger: Arc<dyn ExternalLedgerClient>,
    policy: AnchorPolicy,
    /// Serializes evaluations so two cannot submit for the same tail.
    anchor_lock: Mutex<()>,
}

impl MerkleAnchorEngine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        ledger: Arc<dyn ExternalLedgerClient>,
        policy: AnchorPolicy,
    ) -> Self {
        Self {
            store,
            ledger,
            policy,
            anchor_lock: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> AnchorPolicy {
        self.policy
    }

    /// Evaluate the threshold and anchor if it is reached.
    pub async fn evaluate(&self) -> Result<AnchorOutcome> {
        let _guard = self.anchor_lock.lock().await;

        let last_anchored = self
            .store
            .latest_anchor()
            .await?
            .map(|a| a.last_block_index as i128)
            .unwrap_or(-1);

        let Some(tail) = self.store.latest_block().await? else {
            return Ok(AnchorOutcome::NoBlocks);
        };

        let unanchored = (tail.index as i128 - last_anchored).max(0) as u64;
        if unanchored < self.policy.threshold {
            debug!(
                unanchored,
                threshold = self.policy.threshold,
                "Not enough new blocks to anchor"
            );
            return Ok(AnchorOutcome::BelowThreshold {
                unanchored,
                threshold: self.policy.threshold,
            });
        }

        let hashes = self.store.block_hashes_through(tail.index).await?;
        if hashes.len() as u64 != tail.index + 1 {
            return Err(ProvenanceError::Store(format!(
                "expected {} block hashes through index {}, found {}",
                tail.index + 1,
                tail.index,
                hashes.len()
            )));
        }

        let tree = MerkleTree::from_hex_leaves(&hashes)?;
        let root = tree
            .root()
            .ok_or_else(|| ProvenanceError::Store("no block hashes to anchor".into()))?;
        let merkle_root = crate::crypto::hash::to_prefixed_hex(&root);

        info!(
            merkle_root = %merkle_root,
            last_block_index = tail.index,
            ledger = self.ledger.name(),
            "Submitting Merkle root"
        );
        let submitted = with_timeout(
            "submit",
            self.policy.ledger_timeout,
            self.ledger.submit(&root),
        )
        .await?;

        let anchor = self
            .store
            .insert_anchor(NewAnchor {
                merkle_root,
                last_block_index: tail.index,
                tx_hash: submitted.tx_hash,
                block_number: submitted.block_number,
                chain_id: submitted.chain_id,
            })
            .await?;

        info!(
            tx_hash = %anchor.tx_hash,
            chain_id = anchor.chain_id,
            last_block_index = anchor.last_block_index,
            "Anchor recorded as pending"
        );
        Ok(AnchorOutcome::Anchored(anchor))
    }

    /// Run an evaluation detached from the caller. Failures are logged only.
    pub fn spawn_evaluation(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = engine.evaluate().await {
                warn!(error = %e, "Anchoring failed; will retry on next qualifying append");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::chain::ChainService;
    use crate::merkle::MerkleTree;
    use crate::store::memory::MemoryStore;
    use crate::store::AnchorStatus;
    use crate::test_utils::{registration, MockLedger, MOCK_CHAIN_ID};

    struct Fixture {
        store: Arc<MemoryStore>,
        chain: ChainService,
        ledger: Arc<MockLedger>,
        engine: Arc<MerkleAnchorEngine>,
    }

    async fn fixture(threshold: u64) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let chain = ChainService::new(store.clone());
        chain.ensure_genesis().await.unwrap();
        let ledger = Arc::new(MockLedger::new());
        let policy = AnchorPolicy::new(threshold, Duration::from_millis(200)).unwrap();
        let engine = Arc::new(MerkleAnchorEngine::new(store.clone(), ledger.clone(), policy));
        Fixture {
            store,
            chain,
            ledger,
            engine,
        }
    }

    async fn append_n(f: &Fixture, n: u64) {
        for i in 0..n {
            f.chain.append(registration(&format!("m{i}"), "1")).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_threshold_boundary() {
        // First anchor: tail - (-1) >= 5 means tail index 4
        let f = fixture(5).await;
        append_n(&f, 3).await;
        assert!(matches!(
            f.engine.evaluate().await.unwrap(),
            AnchorOutcome::BelowThreshold { unanchored: 4, threshold: 5 }
        ));
        assert!(f.store.list_anchors().await.unwrap().is_empty());

        append_n(&f, 1).await;
        let AnchorOutcome::Anchored(anchor) = f.engine.evaluate().await.unwrap() else {
            panic!("expected anchor");
        };
        assert_eq!(anchor.last_block_index, 4);
        assert_eq!(anchor.status, AnchorStatus::Pending);
        assert_eq!(anchor.chain_id, MOCK_CHAIN_ID);
        assert_eq!(f.store.list_anchors().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_t_minus_one_then_t_after_anchor() {
        let f = fixture(3).await;
        append_n(&f, 2).await;
        f.engine.evaluate().await.unwrap();
        assert_eq!(f.store.list_anchors().await.unwrap().len(), 1);

        // T-1 appends since the last anchor: no new anchor.
        for _ in 0..2 {
            append_n(&f, 1).await;
            f.engine.evaluate().await.unwrap();
        }
        assert_eq!(f.store.list_anchors().await.unwrap().len(), 1);

        // T-th append: exactly one new anchor covering the tail.
        append_n(&f, 1).await;
        f.engine.evaluate().await.unwrap();
        let anchors = f.store.list_anchors().await.unwrap();
        assert_eq!(anchors.len(), 2);
        assert_eq!(anchors[1].last_block_index, 5);

        // Re-evaluating without new blocks is a no-op.
        f.engine.evaluate().await.unwrap();
        assert_eq!(f.store.list_anchors().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_root_matches_block_hashes() {
        let f = fixture(2).await;
        append_n(&f, 1).await;
        let AnchorOutcome::Anchored(anchor) = f.engine.evaluate().await.unwrap() else {
            panic!("expected anchor");
        };

        let hashes: Vec<String> = f.chain.get_all().await.unwrap().into_iter().map(|b| b.hash).collect();
        let tree = MerkleTree::from_hex_leaves(&hashes).unwrap();
        assert_eq!(Some(anchor.merkle_root.clone()), tree.root_hex());
        assert_eq!(f.ledger.submissions(), vec![tree.root().unwrap().to_vec()]);
    }

    #[tokio::test]
    async fn test_submission_failure_retried_next_time() {
        let f = fixture(2).await;
        f.ledger.fail_submissions(true);
        append_n(&f, 2).await;

        let err = f.engine.evaluate().await.unwrap_err();
        assert!(matches!(err, ProvenanceError::LedgerSubmission(_)));
        assert!(f.store.list_anchors().await.unwrap().is_empty());
        // Blocks stay intact.
        assert_eq!(f.store.count_blocks().await.unwrap(), 3);

        f.ledger.fail_submissions(false);
        append_n(&f, 1).await;
        let AnchorOutcome::Anchored(anchor) = f.engine.evaluate().await.unwrap() else {
            panic!("expected anchor");
        };
        assert_eq!(anchor.last_block_index, 3);
    }

    #[tokio::test]
    async fn test_submit_timeout() {
        let f = fixture(1).await;
        f.ledger.delay_submissions(Duration::from_secs(5));
        append_n(&f, 1).await;

        let err = f.engine.evaluate().await.unwrap_err();
        assert!(matches!(err, ProvenanceError::LedgerTimeout { operation: "submit", .. }));
        assert!(f.store.list_anchors().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_evaluations_submit_once() {
        let f = fixture(2).await;
        append_n(&f, 2).await;

        let handles: Vec<_> = (0..8).map(|_| f.engine.spawn_evaluation()).collect();
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(f.ledger.submissions().len(), 1);
        assert_eq!(f.store.list_anchors().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_store() {
        let store = Arc::new(MemoryStore::new());
        let engine = MerkleAnchorEngine::new(
            store,
            Arc::new(MockLedger::new()),
            AnchorPolicy::default(),
        );
        assert_eq!(engine.evaluate().await.unwrap(), AnchorOutcome::NoBlocks);
    }
}
