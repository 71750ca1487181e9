/// PostgreSQL ledger store.
///
/// Queries are runtime-checked (not `query!` macros) so builds never need a
/// live database. Block payloads are stored as JSONB and read back as raw
/// JSON, never as a typed payload, so a row whose payload was edited still
/// loads and is reported by verification. Key order inside JSONB is
/// irrelevant because hashing goes through canonical encoding.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{Anchor, AnchorStatus, LedgerStore, NewAnchor};
use crate::chain::block::Block;
use crate::error::{ProvenanceError, Result};

fn db_err(e: sqlx::Error) -> ProvenanceError {
    ProvenanceError::Store(e.to_string())
}

fn to_i64(v: u64, field: &str) -> Result<i64> {
    i64::try_from(v).map_err(|_| ProvenanceError::Store(format!("{field} {v} out of range")))
}

fn to_u64(v: i64, field: &str) -> Result<u64> {
    u64::try_from(v).map_err(|_| ProvenanceError::Store(format!("{field} {v} is negative")))
}

#[derive(Debug, FromRow)]
struct BlockRow {
    block_index: i64,
    timestamp: i64,
    data: Json<Value>,
    previous_hash: String,
    hash: String,
}

impl TryFrom<BlockRow> for Block {
    type Error = ProvenanceError;

    fn try_from(row: BlockRow) -> Result<Self> {
        Ok(Block {
            index: to_u64(row.block_index, "block_index")?,
            timestamp: row.timestamp,
            data: row.data.0,
            previous_hash: row.previous_hash,
            hash: row.hash,
        })
    }
}

#[derive(Debug, FromRow)]
struct AnchorRow {
    id: Uuid,
    merkle_root: String,
    last_block_index: i64,
    tx_hash: String,
    block_number: Option<i64>,
    chain_id: i64,
    anchored_at: DateTime<Utc>,
    confirmed_at: Option<DateTime<Utc>>,
    status: String,
}

impl TryFrom<AnchorRow> for Anchor {
    type Error = ProvenanceError;

    fn try_from(row: AnchorRow) -> Result<Self> {
        Ok(Anchor {
            id: row.id,
            merkle_root: row.merkle_root,
            last_block_index: to_u64(row.last_block_index, "last_block_index")?,
            tx_hash: row.tx_hash,
            block_number: row
                .block_number
                .map(|n| to_u64(n, "block_number"))
                .transpose()?,
            chain_id: to_u64(row.chain_id, "chain_id")?,
            anchored_at: row.anchored_at,
            confirmed_at: row.confirmed_at,
            status: row.status.parse().map_err(ProvenanceError::Store)?,
        })
    }
}

fn blocks_from_rows(rows: Vec<BlockRow>) -> Result<Vec<Block>> {
    rows.into_iter().map(Block::try_from).collect()
}

const BLOCK_COLUMNS: &str = "block_index, timestamp, data, previous_hash, hash";

/// Ledger store backed by a PostgreSQL pool.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to PostgreSQL.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(db_err)?;

        Ok(Self { pool })
    }

    /// Run pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| ProvenanceError::Store(format!("Migration failed: {e}")))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_blocks(&self, sql: &str) -> Result<Vec<Block>> {
        let rows = sqlx::query_as::<_, BlockRow>(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        blocks_from_rows(rows)
    }
}

#[async_trait]
impl LedgerStore for PostgresStore {
    async fn insert_block(&self, block: &Block) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO provenance_blocks (block_index, timestamp, subject_id, data, previous_hash, hash)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(to_i64(block.index, "index")?)
        .bind(block.timestamp)
        .bind(block.subject_id())
        .bind(Json(&block.data))
        .bind(&block.previous_hash)
        .bind(&block.hash)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                ProvenanceError::DuplicateBlockIndex(block.index)
            }
            _ => db_err(e),
        })?;

        Ok(())
    }

    async fn latest_block(&self) -> Result<Option<Block>> {
        sqlx::query_as::<_, BlockRow>(&format!(
            "SELECT {BLOCK_COLUMNS} FROM provenance_blocks ORDER BY block_index DESC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .map(Block::try_from)
        .transpose()
    }

    async fn block_by_index(&self, index: u64) -> Result<Option<Block>> {
        sqlx::query_as::<_, BlockRow>(&format!(
            "SELECT {BLOCK_COLUMNS} FROM provenance_blocks WHERE block_index = $1"
        ))
        .bind(to_i64(index, "index")?)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .map(Block::try_from)
        .transpose()
    }

    async fn block_by_hash(&self, hash: &str) -> Result<Option<Block>> {
        sqlx::query_as::<_, BlockRow>(&format!(
            "SELECT {BLOCK_COLUMNS} FROM provenance_blocks WHERE hash = $1 ORDER BY block_index LIMIT 1"
        ))
        .bind(hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .map(Block::try_from)
        .transpose()
    }

    async fn blocks_by_subject(&self, subject_id: &str) -> Result<Vec<Block>> {
        let rows = sqlx::query_as::<_, BlockRow>(&format!(
            "SELECT {BLOCK_COLUMNS} FROM provenance_blocks WHERE subject_id = $1 ORDER BY block_index"
        ))
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        blocks_from_rows(rows)
    }

    async fn all_blocks(&self) -> Result<Vec<Block>> {
        self.fetch_blocks(&format!(
            "SELECT {BLOCK_COLUMNS} FROM provenance_blocks ORDER BY block_index"
        ))
        .await
    }

    async fn block_hashes_through(&self, last_index: u64) -> Result<Vec<String>> {
        sqlx::query_scalar::<_, String>(
            "SELECT hash FROM provenance_blocks WHERE block_index <= $1 ORDER BY block_index",
        )
        .bind(to_i64(last_index, "index")?)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn count_blocks(&self) -> Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM provenance_blocks")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        to_u64(n, "count")
    }

    async fn count_subjects(&self) -> Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT subject_id) FROM provenance_blocks")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        to_u64(n, "count")
    }

    async fn insert_anchor(&self, anchor: NewAnchor) -> Result<Anchor> {
        let anchor = anchor.into_pending();

        let row = sqlx::query_as::<_, AnchorRow>(
            r#"
            INSERT INTO anchors
            (id, merkle_root, last_block_index, tx_hash, block_number, chain_id, anchored_at, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(anchor.id)
        .bind(&anchor.merkle_root)
        .bind(to_i64(anchor.last_block_index, "last_block_index")?)
        .bind(&anchor.tx_hash)
        .bind(
            anchor
                .block_number
                .map(|n| to_i64(n, "block_number"))
                .transpose()?,
        )
        .bind(to_i64(anchor.chain_id, "chain_id")?)
        .bind(anchor.anchored_at)
        .bind(anchor.status.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Anchor::try_from(row)
    }

    async fn latest_anchor(&self) -> Result<Option<Anchor>> {
        sqlx::query_as::<_, AnchorRow>(
            "SELECT * FROM anchors ORDER BY last_block_index DESC, anchored_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .map(Anchor::try_from)
        .transpose()
    }

    async fn list_anchors(&self) -> Result<Vec<Anchor>> {
        sqlx::query_as::<_, AnchorRow>("SELECT * FROM anchors ORDER BY last_block_index")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?
            .into_iter()
            .map(Anchor::try_from)
            .collect()
    }

    async fn pending_anchors(&self) -> Result<Vec<Anchor>> {
        sqlx::query_as::<_, AnchorRow>(
            "SELECT * FROM anchors WHERE status = 'pending' ORDER BY anchored_at",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?
        .into_iter()
        .map(Anchor::try_from)
        .collect()
    }

    async fn confirm_anchor(
        &self,
        id: Uuid,
        block_number: u64,
        confirmed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE anchors
            SET status = 'confirmed', block_number = $2, confirmed_at = $3
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(to_i64(block_number, "block_number")?)
        .bind(confirmed_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() == 1)
    }
}
