/// Provenance service: the interface handed to request-handling code.
///
/// Wraps the chain's single writer and, when a ledger is configured, fires
/// a detached anchoring evaluation after every append. The caller of
/// [`ProvenanceService::append_block`] never waits on anchoring, and an
/// anchoring failure never affects the already-persisted block.
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::anchor::engine::{AnchorOutcome, MerkleAnchorEngine};
use crate::chain::service::rfc3339;
use crate::chain::{Block, BlockPayload, ChainService, Inference, ModelRegistration, ProvenanceReport};
use crate::config::explorer_tx_url;
use crate::error::Result;
use crate::merkle::{MerkleProof, MerkleTree};
use crate::store::{Anchor, LedgerStore};

/// `{valid, errors}` verdict over the whole chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainVerification {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// An anchor with an optional block-explorer link.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorSummary {
    #[serde(flatten)]
    pub anchor: Anchor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explorer_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainStats {
    pub total_blocks: u64,
    /// Distinct subjects, genesis excluded.
    pub total_models: u64,
    pub last_block_index: u64,
    pub last_block_hash: String,
    pub last_block_timestamp: Option<String>,
    pub chain_valid: bool,
    pub errors: Vec<String>,
    pub last_anchor: Option<AnchorSummary>,
}

/// Proof that a block hash is committed by an anchor's Merkle root.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockInclusionProof {
    pub block_index: u64,
    pub block_hash: String,
    pub anchor: Anchor,
    /// Root recomputed from the current store.
    pub root: String,
    /// False if the stored hashes no longer reproduce the anchored root.
    pub matches_anchor: bool,
    pub proof: MerkleProof,
}

pub struct ProvenanceService {
    chain: Arc<ChainService>,
    engine: Option<Arc<MerkleAnchorEngine>>,
    explorer_url: Option<String>,
}

impl ProvenanceService {
    pub fn new(store: Arc<dyn LedgerStore>, engine: Option<Arc<MerkleAnchorEngine>>) -> Self {
        Self {
            chain: Arc::new(ChainService::new(store)),
            engine,
            explorer_url: None,
        }
    }

    /// Base URL used to link anchor transactions, e.g. `https://sepolia.etherscan.io`.
    pub fn with_explorer_url(mut self, url: Option<String>) -> Self {
        self.explorer_url = url;
        self
    }

    pub fn chain(&self) -> &Arc<ChainService> {
        &self.chain
    }

    fn store(&self) -> &Arc<dyn LedgerStore> {
        self.chain.store()
    }

    /// Create the genesis block if it is missing.
    pub async fn init(&self) -> Result<Block> {
        self.chain.ensure_genesis().await
    }

    /// Append a block; anchoring is evaluated in the background.
    pub async fn append_block(&self, payload: BlockPayload) -> Result<Block> {
        let block = self.chain.append(payload).await?;
        if let Some(engine) = &self.engine {
            engine.spawn_evaluation();
        }
        Ok(block)
    }

    /// Run an anchoring evaluation inline. `None` when no ledger is configured.
    pub async fn anchor_now(&self) -> Result<Option<AnchorOutcome>> {
        match &self.engine {
            Some(engine) => engine.evaluate().await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn register_model(&self, registration: ModelRegistration) -> Result<Block> {
        self.append_block(registration.into()).await
    }

    /// Record an inference, stamping `executedAt` if the caller did not.
    pub async fn log_inference(&self, mut inference: Inference) -> Result<Block> {
        if inference.executed_at.is_none() {
            inference.executed_at = Some(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true));
        }
        self.append_block(inference.into()).await
    }

    pub async fn get_provenance(&self, subject_id: &str) -> Result<ProvenanceReport> {
        self.chain.get_by_subject(subject_id).await
    }

    pub async fn verify_chain(&self) -> Result<ChainVerification> {
        let report = self.chain.verify().await?;
        Ok(ChainVerification {
            valid: report.valid,
            errors: report.errors(),
        })
    }

    pub async fn get_block(&self, index: u64) -> Result<Option<Block>> {
        self.chain.get_by_index(index).await
    }

    pub async fn get_block_by_hash(&self, hash: &str) -> Result<Option<Block>> {
        self.chain.get_by_hash(hash).await
    }

    pub async fn get_all_blocks(&self) -> Result<Vec<Block>> {
        self.chain.get_all().await
    }

    /// Index of the chain tail (0 for an empty or genesis-only chain).
    pub async fn height(&self) -> Result<u64> {
        Ok(self.chain.tail().await?.map_or(0, |b| b.index))
    }

    pub async fn list_anchors(&self) -> Result<Vec<Anchor>> {
        self.store().list_anchors().await
    }

    fn summarize(&self, anchor: Anchor) -> AnchorSummary {
        let explorer_url = self
            .explorer_url
            .as_deref()
            .map(|base| explorer_tx_url(base, &anchor.tx_hash));
        AnchorSummary {
            anchor,
            explorer_url,
        }
    }

    pub async fn get_chain_stats(&self) -> Result<ChainStats> {
        let store = self.store();
        let total_blocks = store.count_blocks().await?;
        let tail = store.latest_block().await?;
        let subjects = store.count_subjects().await?;
        let verification = self.chain.verify().await?;
        let last_anchor = store.latest_anchor().await?.map(|a| self.summarize(a));

        Ok(ChainStats {
            total_blocks,
            total_models: subjects.saturating_sub(1),
            last_block_index: tail.as_ref().map_or(0, |b| b.index),
            last_block_hash: tail.as_ref().map(|b| b.hash.clone()).unwrap_or_default(),
            last_block_timestamp: tail.as_ref().map(|b| rfc3339(b.timestamp)),
            chain_valid: verification.valid,
            errors: verification.errors(),
            last_anchor,
        })
    }

    /// Inclusion proof against the earliest anchor covering `block_index`.
    pub async fn merkle_proof(&self, block_index: u64) -> Result<Option<BlockInclusionProof>> {
        let Some(block) = self.chain.get_by_index(block_index).await? else {
            return Ok(None);
        };
        let Some(anchor) = self
            .store()
            .list_anchors()
            .await?
            .into_iter()
            .find(|a| a.last_block_index >= block_index)
        else {
            return Ok(None);
        };

        let hashes = self.store().block_hashes_through(anchor.last_block_index).await?;
        // Leaf position follows stored order, which differs from the block
        // index once a row is missing.
        let Some(position) = hashes.iter().position(|h| *h == block.hash) else {
            return Ok(None);
        };
        let tree = MerkleTree::from_hex_leaves(&hashes)?;
        let (Some(root), Some(proof)) = (tree.root_hex(), tree.prove(position)) else {
            return Ok(None);
        };

        Ok(Some(BlockInclusionProof {
            block_index,
            block_hash: block.hash,
            matches_anchor: root == anchor.merkle_root,
            root,
            anchor,
            proof,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::AnchorPolicy;
    use crate::crypto::hash;
    use crate::merkle::verify_proof;
    use crate::store::memory::MemoryStore;
    use crate::test_utils::{registration, MockLedger};

    async fn service(threshold: u64) -> (Arc<MemoryStore>, Arc<MockLedger>, ProvenanceService) {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(MockLedger::new());
        let engine = Arc::new(MerkleAnchorEngine::new(
            store.clone(),
            ledger.clone(),
            AnchorPolicy::new(threshold, Duration::from_secs(1)).unwrap(),
        ));
        let svc = ProvenanceService::new(store.clone(), Some(engine))
            .with_explorer_url(Some("https://sepolia.etherscan.io/".into()));
        svc.init().await.unwrap();
        (store, ledger, svc)
    }

    async fn wait_for_anchors(store: &MemoryStore, n: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while store.list_anchors().await.unwrap().len() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("anchor not recorded in time");
    }

    #[tokio::test]
    async fn test_append_triggers_background_anchor() {
        // Tail 2 is the first to reach the threshold of 3.
        let (store, _, svc) = service(3).await;
        svc.append_block(registration("m1", "1")).await.unwrap();
        svc.append_block(registration("m2", "1")).await.unwrap();

        wait_for_anchors(&store, 1).await;
        let stats = svc.get_chain_stats().await.unwrap();
        let last = stats.last_anchor.unwrap();
        assert_eq!(last.anchor.last_block_index, 2);
        assert_eq!(
            last.explorer_url.unwrap(),
            format!("https://sepolia.etherscan.io/tx/{}", last.anchor.tx_hash)
        );
    }

    #[tokio::test]
    async fn test_append_unaffected_by_ledger_failure() {
        let (store, ledger, svc) = service(1).await;
        ledger.fail_submissions(true);

        let block = svc.append_block(registration("m1", "1")).await.unwrap();
        assert_eq!(block.index, 1);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(store.list_anchors().await.unwrap().is_empty());
        assert!(svc.verify_chain().await.unwrap().valid);
        assert_eq!(svc.get_block(1).await.unwrap(), Some(block));
    }

    #[tokio::test]
    async fn test_anchor_now() {
        let (store, _, svc) = service(1).await;
        svc.chain().append(registration("m1", "1")).await.unwrap();
        let outcome = svc.anchor_now().await.unwrap().unwrap();
        assert!(matches!(outcome, AnchorOutcome::Anchored(ref a) if a.last_block_index == 1));
        assert_eq!(store.list_anchors().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_works_without_ledger() {
        let store = Arc::new(MemoryStore::new());
        let svc = ProvenanceService::new(store, None);
        svc.init().await.unwrap();
        svc.append_block(registration("m1", "1")).await.unwrap();
        assert_eq!(svc.height().await.unwrap(), 1);
        assert!(svc.list_anchors().await.unwrap().is_empty());
        assert!(svc.anchor_now().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_log_inference_stamps_execution_time() {
        let (_, _, svc) = service(100).await;
        let block = svc
            .log_inference(Inference {
                model_id: "iris".into(),
                input_hash: Some("aa".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let BlockPayload::Inference(data) = block.payload().unwrap() else {
            panic!("expected inference payload");
        };
        assert!(data.executed_at.is_some());
    }

    #[tokio::test]
    async fn test_stats() {
        let (_, _, svc) = service(100).await;
        svc.register_model(ModelRegistration {
            model_id: "iris".into(),
            ..Default::default()
        })
        .await
        .unwrap();
        svc.log_inference(Inference {
            model_id: "iris".into(),
            ..Default::default()
        })
        .await
        .unwrap();
        svc.register_model(ModelRegistration {
            model_id: "mnist".into(),
            ..Default::default()
        })
        .await
        .unwrap();

        let stats = svc.get_chain_stats().await.unwrap();
        assert_eq!(stats.total_blocks, 4);
        assert_eq!(stats.total_models, 2);
        assert_eq!(stats.last_block_index, 3);
        assert!(stats.chain_valid);
        assert!(stats.last_anchor.is_none());
    }

    #[tokio::test]
    async fn test_merkle_proof_for_anchored_block() {
        let (store, _, svc) = service(4).await;
        for i in 0..3 {
            svc.append_block(registration(&format!("m{i}"), "1")).await.unwrap();
        }
        wait_for_anchors(&store, 1).await;

        let p = svc.merkle_proof(2).await.unwrap().unwrap();
        assert!(p.matches_anchor);
        assert_eq!(p.anchor.last_block_index, 3);
        assert_eq!(p.proof.leaf_hash, hash::parse_digest(&p.block_hash).unwrap());
        assert!(verify_proof(&hash::parse_digest(&p.anchor.merkle_root).unwrap(), &p.proof));
    }

    #[tokio::test]
    async fn test_merkle_proof_detects_rewrite_after_anchor() {
        let (store, _, svc) = service(3).await;
        for i in 0..2 {
            svc.append_block(registration(&format!("m{i}"), "1")).await.unwrap();
        }
        wait_for_anchors(&store, 1).await;

        store.tamper_block(1, |b| b.hash = "ab".repeat(32)).await;
        let p = svc.merkle_proof(1).await.unwrap().unwrap();
        assert!(!p.matches_anchor);
    }

    #[tokio::test]
    async fn test_merkle_proof_after_row_removed() {
        let (store, _, svc) = service(5).await;
        for i in 0..4 {
            svc.chain().append(registration(&format!("m{i}"), "1")).await.unwrap();
        }
        svc.anchor_now().await.unwrap();
        store.remove_block(2).await;

        let p = svc.merkle_proof(3).await.unwrap().unwrap();
        let block = svc.get_block(3).await.unwrap().unwrap();
        assert_eq!(p.proof.leaf_index, 2);
        assert_eq!(p.proof.leaf_hash, hash::parse_digest(&block.hash).unwrap());
        assert!(verify_proof(&hash::parse_digest(&p.root).unwrap(), &p.proof));
        assert!(!p.matches_anchor);
        assert!(svc.merkle_proof(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_merkle_proof_unanchored_block() {
        let (_, _, svc) = service(100).await;
        svc.append_block(registration("m1", "1")).await.unwrap();
        assert!(svc.merkle_proof(1).await.unwrap().is_none());
        assert!(svc.merkle_proof(42).await.unwrap().is_none());
    }
}
