/// Durable, ordered storage for blocks and anchors.
///
/// The chain logic is written against [`LedgerStore`]; two backends exist:
/// - [`memory::MemoryStore`]: in-process, used by tests and ephemeral nodes
/// - [`postgres::PostgresStore`]: PostgreSQL via sqlx
///
/// Stores enforce the uniqueness of block indices and make the single
/// anchor status transition (pending → confirmed) atomic.
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chain::block::Block;
use crate::error::Result;

/// Anchor lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorStatus {
    Pending,
    Confirmed,
}

impl AnchorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnchorStatus::Pending => "pending",
            AnchorStatus::Confirmed => "confirmed",
        }
    }
}

impl std::str::FromStr for AnchorStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AnchorStatus::Pending),
            "confirmed" => Ok(AnchorStatus::Confirmed),
            other => Err(format!("unknown anchor status '{other}'")),
        }
    }
}

/// One external-ledger commitment of a Merkle root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anchor {
    pub id: Uuid,
    /// `0x`-prefixed Merkle root over block hashes `0..=last_block_index`.
    pub merkle_root: String,
    pub last_block_index: u64,
    pub tx_hash: String,
    /// Provisional at submit time, final once confirmed.
    pub block_number: Option<u64>,
    pub chain_id: u64,
    pub anchored_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub status: AnchorStatus,
}

/// Fields of an anchor about to be persisted.
#[derive(Debug, Clone)]
pub struct NewAnchor {
    pub merkle_root: String,
    pub last_block_index: u64,
    pub tx_hash: String,
    pub block_number: Option<u64>,
    pub chain_id: u64,
}

impl NewAnchor {
    pub(crate) fn into_pending(self) -> Anchor {
        Anchor {
            id: Uuid::now_v7(),
            merkle_root: self.merkle_root,
            last_block_index: self.last_block_index,
            tx_hash: self.tx_hash,
            block_number: self.block_number,
            chain_id: self.chain_id,
            anchored_at: Utc::now(),
            confirmed_at: None,
            status: AnchorStatus::Pending,
        }
    }
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Persist a block. Fails with `DuplicateBlockIndex` if the index exists.
    async fn insert_block(&self, block: &Block) -> Result<()>;

    /// Block with the highest index.
    async fn latest_block(&self) -> Result<Option<Block>>;

    async fn block_by_index(&self, index: u64) -> Result<Option<Block>>;

    async fn block_by_hash(&self, hash: &str) -> Result<Option<Block>>;

    /// Blocks whose payload subject equals `subject_id`, in index order.
    async fn blocks_by_subject(&self, subject_id: &str) -> Result<Vec<Block>>;

    /// All blocks in index order.
    async fn all_blocks(&self) -> Result<Vec<Block>>;

    /// Hashes of blocks `0..=last_index`, in index order.
    async fn block_hashes_through(&self, last_index: u64) -> Result<Vec<String>>;

    async fn count_blocks(&self) -> Result<u64>;

    /// Number of distinct payload subjects.
    async fn count_subjects(&self) -> Result<u64>;

    async fn insert_anchor(&self, anchor: NewAnchor) -> Result<Anchor>;

    /// Anchor with the highest `last_block_index`.
    async fn latest_anchor(&self) -> Result<Option<Anchor>>;

    /// All anchors, ordered by `last_block_index`.
    async fn list_anchors(&self) -> Result<Vec<Anchor>>;

    async fn pending_anchors(&self) -> Result<Vec<Anchor>>;

    /// Promote a pending anchor to confirmed. Returns false if the anchor
    /// was not pending (already confirmed or unknown).
    async fn confirm_anchor(
        &self,
        id: Uuid,
        block_number: u64,
        confirmed_at: DateTime<Utc>,
    ) -> Result<bool>;
}
