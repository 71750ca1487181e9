/// The chain's single writer.
///
/// Appends are serialized by `write_lock`: reading the tail, computing the
/// next block, and persisting it happen as one critical section, so two
/// concurrent appends can never observe the same tail.
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::block::Block;
use super::payload::BlockPayload;
use super::verify::{verify_blocks, VerificationReport};
use crate::error::{ProvenanceError, Result};
use crate::store::LedgerStore;

/// One block in a subject's provenance history.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub block_index: u64,
    /// RFC 3339.
    pub timestamp: String,
    pub timestamp_unix: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
    pub block_hash: String,
    pub previous_hash: String,
}

impl HistoryEntry {
    fn from_block(block: &Block) -> Self {
        Self {
            block_index: block.index,
            timestamp: rfc3339(block.timestamp),
            timestamp_unix: block.timestamp,
            kind: block.kind().to_string(),
            payload: block.data.clone(),
            block_hash: block.hash.clone(),
            previous_hash: block.previous_hash.clone(),
        }
    }
}

/// Every block about one subject plus the current chain verdict.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceReport {
    pub subject_id: String,
    pub total_blocks: u64,
    pub chain_valid: bool,
    pub errors: Vec<String>,
    pub history: Vec<HistoryEntry>,
}

pub(crate) fn rfc3339(unix_secs: i64) -> String {
    Utc.timestamp_opt(unix_secs, 0)
        .single()
        .map(|t| t.to_rfc3339())
        .unwrap_or_default()
}

pub struct ChainService {
    store: Arc<dyn LedgerStore>,
    write_lock: Mutex<()>,
}

impl ChainService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Create block 0 if absent. Idempotent; returns the genesis block.
    pub async fn ensure_genesis(&self) -> Result<Block> {
        let _guard = self.write_lock.lock().await;

        if let Some(existing) = self.store.block_by_index(0).await? {
            debug!(hash = %existing.hash, "Genesis block already present");
            return Ok(existing);
        }

        let genesis = Block::genesis(Utc::now().timestamp())?;
        self.store.insert_block(&genesis).await?;
        info!(
            hash = %genesis.hash,
            timestamp = %rfc3339(genesis.timestamp),
            "Genesis block created"
        );
        Ok(genesis)
    }

    /// Append a payload as the next block.
    pub async fn append(&self, payload: BlockPayload) -> Result<Block> {
        let _guard = self.write_lock.lock().await;

        let tail = self
            .store
            .latest_block()
            .await?
            .ok_or(ProvenanceError::ChainUninitialized)?;

        let block = Block::seal(
            tail.index + 1,
            Utc::now().timestamp(),
            payload,
            tail.hash,
        )?;
        self.store.insert_block(&block).await?;

        info!(
            index = block.index,
            hash = %block.hash,
            subject = %block.subject_id(),
            kind = block.kind(),
            "Block appended"
        );
        Ok(block)
    }

    /// Recompute every hash and link. O(n) over the full chain.
    pub async fn verify(&self) -> Result<VerificationReport> {
        let blocks = self.store.all_blocks().await?;
        Ok(verify_blocks(&blocks))
    }

    /// Provenance history of one subject, with the current chain verdict.
    pub async fn get_by_subject(&self, subject_id: &str) -> Result<ProvenanceReport> {
        let blocks = self.store.blocks_by_subject(subject_id).await?;
        let verification = self.verify().await?;

        let history = blocks.iter().map(HistoryEntry::from_block).collect();

        Ok(ProvenanceReport {
            subject_id: subject_id.to_string(),
            total_blocks: blocks.len() as u64,
            chain_valid: verification.valid,
            errors: verification.errors(),
            history,
        })
    }

    pub async fn get_by_index(&self, index: u64) -> Result<Option<Block>> {
        self.store.block_by_index(index).await
    }

    pub async fn get_by_hash(&self, hash: &str) -> Result<Option<Block>> {
        self.store.block_by_hash(hash).await
    }

    pub async fn get_all(&self) -> Result<Vec<Block>> {
        self.store.all_blocks().await
    }

    /// The current tail, if any.
    pub async fn tail(&self) -> Result<Option<Block>> {
        self.store.latest_block().await
    }
}
