use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProvenanceError {
    #[error("Chain not initialized: genesis block missing")]
    ChainUninitialized,

    #[error("Block index {0} already exists")]
    DuplicateBlockIndex(u64),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Canonicalization failed: {0}")]
    Canonicalization(String),

    #[error("Anchor submission failed: {0}")]
    LedgerSubmission(String),

    #[error("Receipt lookup failed: {0}")]
    ReceiptLookup(String),

    #[error("Ledger call '{operation}' timed out after {seconds}s")]
    LedgerTimeout { operation: &'static str, seconds: u64 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ProvenanceError {
    fn from(e: serde_json::Error) -> Self {
        ProvenanceError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ProvenanceError>;
