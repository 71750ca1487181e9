/// Runtime configuration.
///
/// Every option can be given as a flag or an environment variable. Typed
/// views (`AnchorPolicy`, `PollerConfig`, `EthereumConfig`) are handed to
/// the components that consume them.
use std::time::Duration;

use clap::Args;

use crate::error::{ProvenanceError, Result};

/// Anchoring policy for the Merkle anchor engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnchorPolicy {
    /// Anchor once `tail.index - last_anchored_index >= threshold`.
    pub threshold: u64,
    /// Timeout for `submit`.
    pub ledger_timeout: Duration,
}

impl AnchorPolicy {
    pub fn new(threshold: u64, ledger_timeout: Duration) -> Result<Self> {
        if threshold == 0 {
            return Err(ProvenanceError::InvalidConfig(
                "anchor threshold must be at least 1".into(),
            ));
        }
        Ok(Self {
            threshold,
            ledger_timeout,
        })
    }
}

impl Default for AnchorPolicy {
    fn default() -> Self {
        Self {
            threshold: 5,
            ledger_timeout: Duration::from_secs(30),
        }
    }
}

/// Schedule for the confirmation sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    pub interval: Duration,
    /// Timeout for each `get_receipt`.
    pub ledger_timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(600),
            ledger_timeout: Duration::from_secs(30),
        }
    }
}

/// Connection details for Ethereum anchoring.
#[derive(Debug, Clone)]
pub struct EthereumConfig {
    /// JSON-RPC endpoint (Infura, Alchemy, local node).
    pub rpc_url: String,
    /// Hex private key used to sign anchor transactions.
    pub private_key_hex: String,
    /// 1 for mainnet, 11155111 for Sepolia.
    pub chain_id: u64,
    /// Block explorer base URL, used to build transaction links.
    pub explorer_url: Option<String>,
}

/// Block-explorer link for a transaction.
pub fn explorer_tx_url(base: &str, tx_hash: &str) -> String {
    format!("{}/tx/{tx_hash}", base.trim_end_matches('/'))
}

#[derive(Debug, Clone, Args)]
pub struct NodeConfig {
    /// PostgreSQL URL. Without it the chain lives in memory.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Blocks to accumulate past the last anchor before anchoring again.
    #[arg(long, env = "ANCHOR_THRESHOLD", default_value_t = 5)]
    pub anchor_threshold: u64,

    /// Seconds between confirmation sweeps.
    #[arg(long, env = "ANCHOR_POLL_INTERVAL_SECS", default_value_t = 600)]
    pub poll_interval_secs: u64,

    /// Timeout in seconds for each external ledger call.
    #[arg(long, env = "LEDGER_TIMEOUT_SECS", default_value_t = 30)]
    pub ledger_timeout_secs: u64,

    #[arg(long, env = "ETH_RPC_URL")]
    pub eth_rpc_url: Option<String>,

    #[arg(long, env = "ETH_PRIVATE_KEY", hide_env_values = true)]
    pub eth_private_key: Option<String>,

    #[arg(long, env = "ETH_CHAIN_ID", default_value_t = 11_155_111)]
    pub eth_chain_id: u64,

    #[arg(long, env = "ETH_EXPLORER_URL", default_value = "https://sepolia.etherscan.io")]
    pub eth_explorer_url: String,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit JSON log lines.
    #[arg(long, env = "LOG_JSON", default_value_t = false)]
    pub log_json: bool,
}

impl NodeConfig {
    pub fn ledger_timeout(&self) -> Duration {
        Duration::from_secs(self.ledger_timeout_secs)
    }

    pub fn anchor_policy(&self) -> Result<AnchorPolicy> {
        AnchorPolicy::new(self.anchor_threshold, self.ledger_timeout())
    }

    pub fn poller_config(&self) -> Result<PollerConfig> {
        if self.poll_interval_secs == 0 {
            return Err(ProvenanceError::InvalidConfig(
                "poll interval must be at least 1 second".into(),
            ));
        }
        Ok(PollerConfig {
            interval: Duration::from_secs(self.poll_interval_secs),
            ledger_timeout: self.ledger_timeout(),
        })
    }

    /// Ethereum settings, or `None` when anchoring is not configured.
    pub fn ethereum(&self) -> Result<Option<EthereumConfig>> {
        match (&self.eth_rpc_url, &self.eth_private_key) {
            (Some(rpc_url), Some(key)) => Ok(Some(EthereumConfig {
                rpc_url: rpc_url.clone(),
                private_key_hex: key.clone(),
                chain_id: self.eth_chain_id,
                explorer_url: Some(self.eth_explorer_url.clone()).filter(|u| !u.is_empty()),
            })),
            (None, None) => Ok(None),
            _ => Err(ProvenanceError::InvalidConfig(
                "ETH_RPC_URL and ETH_PRIVATE_KEY must be set together".into(),
            )),
        }
    }
}
