/// In-process ledger store.
use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Anchor, AnchorStatus, LedgerStore, NewAnchor};
use crate::chain::block::Block;
use crate::error::{ProvenanceError, Result};

#[derive(Default)]
pub struct MemoryStore {
    blocks: RwLock<BTreeMap<u64, Block>>,
    anchors: RwLock<Vec<Anchor>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mutate a stored block in place, bypassing every invariant.
    #[cfg(test)]
    pub(crate) async fn tamper_block(&self, index: u64, f: impl FnOnce(&mut Block)) {
        if let Some(block) = self.blocks.write().await.get_mut(&index) {
            f(block);
        }
    }

    /// Delete a stored block, leaving a gap in the chain.
    #[cfg(test)]
    pub(crate) async fn remove_block(&self, index: u64) {
        self.blocks.write().await.remove(&index);
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn insert_block(&self, block: &Block) -> Result<()> {
        let mut blocks = self.blocks.write().await;
        if blocks.contains_key(&block.index) {
            return Err(ProvenanceError::DuplicateBlockIndex(block.index));
        }
        blocks.insert(block.index, block.clone());
        Ok(())
    }

    async fn latest_block(&self) -> Result<Option<Block>> {
        Ok(self.blocks.read().await.values().next_back().cloned())
    }

    async fn block_by_index(&self, index: u64) -> Result<Option<Block>> {
        Ok(self.blocks.read().await.get(&index).cloned())
    }

    async fn block_by_hash(&self, hash: &str) -> Result<Option<Block>> {
        Ok(self
            .blocks
            .read()
            .await
            .values()
            .find(|b| b.hash == hash)
            .cloned())
    }

    async fn blocks_by_subject(&self, subject_id: &str) -> Result<Vec<Block>> {
        Ok(self
            .blocks
            .read()
            .await
            .values()
            .filter(|b| b.subject_id() == subject_id)
            .cloned()
            .collect())
    }

    async fn all_blocks(&self) -> Result<Vec<Block>> {
        Ok(self.blocks.read().await.values().cloned().collect())
    }

    async fn block_hashes_through(&self, last_index: u64) -> Result<Vec<String>> {
        Ok(self
            .blocks
            .read()
            .await
            .range(..=last_index)
            .map(|(_, b)| b.hash.clone())
            .collect())
    }

    async fn count_blocks(&self) -> Result<u64> {
        Ok(self.blocks.read().await.len() as u64)
    }

    async fn count_subjects(&self) -> Result<u64> {
        let blocks = self.blocks.read().await;
        let subjects: BTreeSet<&str> = blocks.values().map(|b| b.subject_id()).collect();
        Ok(subjects.len() as u64)
    }

    async fn insert_anchor(&self, anchor: NewAnchor) -> Result<Anchor> {
        let anchor = anchor.into_pending();
        self.anchors.write().await.push(anchor.clone());
        Ok(anchor)
    }

    async fn latest_anchor(&self) -> Result<Option<Anchor>> {
        Ok(self
            .anchors
            .read()
            .await
            .iter()
            .max_by_key(|a| a.last_block_index)
            .cloned())
    }

    async fn list_anchors(&self) -> Result<Vec<Anchor>> {
        let mut anchors = self.anchors.read().await.clone();
        anchors.sort_by_key(|a| a.last_block_index);
        Ok(anchors)
    }

    async fn pending_anchors(&self) -> Result<Vec<Anchor>> {
        Ok(self
            .anchors
            .read()
            .await
            .iter()
            .filter(|a| a.status == AnchorStatus::Pending)
            .cloned()
            .collect())
    }

    async fn confirm_anchor(
        &self,
        id: Uuid,
        block_number: u64,
        confirmed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut anchors = self.anchors.write().await;
        match anchors
            .iter_mut()
            .find(|a| a.id == id && a.status == AnchorStatus::Pending)
        {
            Some(anchor) => {
                anchor.status = AnchorStatus::Confirmed;
                anchor.block_number = Some(block_number);
                anchor.confirmed_at = Some(confirmed_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
