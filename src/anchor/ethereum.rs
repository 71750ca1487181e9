/// Ethereum calldata anchoring over raw JSON-RPC.
///
/// Sends a zero-value legacy transaction to self with the Merkle root as
/// calldata. Calldata is stored permanently on-chain and is the cheapest
/// way to commit 32 bytes.
use std::time::Duration;

use alloy::consensus::SignableTransaction;
use alloy::eips::eip2718::Encodable2718;
use alloy::primitives::{Bytes, TxKind, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use super::{ExternalLedgerClient, SubmittedTx, TxReceipt};
use crate::config::EthereumConfig;
use crate::error::{ProvenanceError, Result};

/// 21000 base + calldata for up to 32 non-zero bytes, with headroom.
const ANCHOR_GAS_LIMIT: u64 = 25_000;

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: String,
    block_number: Option<String>,
    status: Option<String>,
}

fn parse_quantity(hex_str: &str) -> std::result::Result<u128, String> {
    u128::from_str_radix(hex_str.trim_start_matches("0x"), 16)
        .map_err(|e| format!("invalid quantity '{hex_str}': {e}"))
}

/// Parse a quantity that must fit in 64 bits (nonce, block number, chain id).
fn parse_u64(hex_str: &str) -> std::result::Result<u64, String> {
    let value = parse_quantity(hex_str)?;
    u64::try_from(value).map_err(|_| format!("quantity '{hex_str}' exceeds u64"))
}

impl TryFrom<RpcReceipt> for TxReceipt {
    type Error = ProvenanceError;

    fn try_from(r: RpcReceipt) -> Result<Self> {
        let block_number = r
            .block_number
            .as_deref()
            .map(parse_u64)
            .transpose()
            .map_err(ProvenanceError::ReceiptLookup)?;
        Ok(TxReceipt {
            tx_hash: r.transaction_hash,
            block_number,
            // Pre-Byzantium receipts carry no status; treat as success.
            success: r.status.as_deref() != Some("0x0"),
        })
    }
}

pub struct EthereumLedgerClient {
    config: EthereumConfig,
    signer: PrivateKeySigner,
    client: Client,
}

impl EthereumLedgerClient {
    pub fn new(config: EthereumConfig, timeout: Duration) -> Result<Self> {
        let signer: PrivateKeySigner = config
            .private_key_hex
            .trim_start_matches("0x")
            .parse()
            .map_err(|e| ProvenanceError::InvalidConfig(format!("Invalid ETH private key: {e}")))?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProvenanceError::InvalidConfig(format!("HTTP client: {e}")))?;

        Ok(Self {
            config,
            signer,
            client,
        })
    }

    /// Send a JSON-RPC request. `Ok(None)` when the node returns a null result.
    async fn rpc_call_optional<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
        err: fn(String) -> ProvenanceError,
    ) -> Result<Option<T>> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let resp: JsonRpcResponse<T> = self
            .client
            .post(&self.config.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| err(format!("{method}: {e}")))?
            .error_for_status()
            .map_err(|e| err(format!("{method}: {e}")))?
            .json()
            .await
            .map_err(|e| err(format!("{method}: response parse error: {e}")))?;

        if let Some(rpc_err) = resp.error {
            return Err(err(format!("{method}: {}", rpc_err.message)));
        }

        Ok(resp.result)
    }

    async fn rpc_call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
        err: fn(String) -> ProvenanceError,
    ) -> Result<T> {
        self.rpc_call_optional(method, params, err)
            .await?
            .ok_or_else(|| err(format!("{method}: empty RPC response")))
    }

    /// Chain id reported by the node.
    pub async fn remote_chain_id(&self) -> Result<u64> {
        let hex_id: String = self
            .rpc_call("eth_chainId", serde_json::json!([]), ProvenanceError::LedgerSubmission)
            .await?;
        parse_u64(&hex_id).map_err(ProvenanceError::LedgerSubmission)
    }

    /// Build, sign, and send the anchoring transaction.
    async fn send_anchor_tx(&self, payload: &[u8]) -> Result<String> {
        let from_address = self.signer.address();
        let submit_err = ProvenanceError::LedgerSubmission;

        let nonce_hex: String = self
            .rpc_call(
                "eth_getTransactionCount",
                serde_json::json!([format!("{from_address:?}"), "pending"]),
                submit_err,
            )
            .await?;
        let nonce = parse_u64(&nonce_hex).map_err(submit_err)?;

        let gas_price_hex: String = self
            .rpc_call("eth_gasPrice", serde_json::json!([]), submit_err)
            .await?;
        let gas_price = parse_quantity(&gas_price_hex).map_err(submit_err)?;

        let tx = alloy::consensus::TxLegacy {
            chain_id: Some(self.config.chain_id),
            nonce,
            gas_price,
            gas_limit: ANCHOR_GAS_LIMIT,
            to: TxKind::Call(from_address),
            value: U256::ZERO,
            input: Bytes::copy_from_slice(payload),
        };

        let sig = self
            .signer
            .sign_hash(&tx.signature_hash())
            .await
            .map_err(|e| submit_err(format!("signing failed: {e}")))?;
        let signed = alloy::consensus::TxEnvelope::Legacy(tx.into_signed(sig));

        let mut raw_tx = Vec::new();
        signed.encode_2718(&mut raw_tx);
        let raw_hex = format!("0x{}", hex::encode(&raw_tx));

        self.rpc_call("eth_sendRawTransaction", serde_json::json!([raw_hex]), submit_err)
            .await
    }
}

#[async_trait]
impl ExternalLedgerClient for EthereumLedgerClient {
    fn name(&self) -> &str {
        "ethereum"
    }

    async fn submit(&self, payload: &[u8]) -> Result<SubmittedTx> {
        let tx_hash = self.send_anchor_tx(payload).await?;
        debug!(tx_hash = %tx_hash, "Anchor transaction sent");

        // Rarely mined already; the poller fills in the block number later.
        let block_number = match self.get_receipt(&tx_hash).await {
            Ok(receipt) => receipt.and_then(|r| r.block_number),
            Err(_) => None,
        };

        Ok(SubmittedTx {
            tx_hash,
            block_number,
            chain_id: self.config.chain_id,
        })
    }

    async fn get_receipt(&self, tx_hash: &str) -> Result<Option<TxReceipt>> {
        let receipt: Option<RpcReceipt> = self
            .rpc_call_optional(
                "eth_getTransactionReceipt",
                serde_json::json!([tx_hash]),
                ProvenanceError::ReceiptLookup,
            )
            .await?;
        receipt.map(TxReceipt::try_from).transpose()
    }
}
