/// Shared test fixtures.
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::anchor::{ExternalLedgerClient, SubmittedTx, TxReceipt};
use crate::chain::payload::{BlockPayload, ModelRegistration};
use crate::error::{ProvenanceError, Result};

pub const MOCK_CHAIN_ID: u64 = 31337;

/// Scriptable in-memory ledger.
#[derive(Default)]
pub struct MockLedger {
    next_tx: AtomicU64,
    fail_submit: AtomicBool,
    submit_delay: Mutex<Option<Duration>>,
    receipt_delay: Mutex<Option<Duration>>,
    submitted: Mutex<Vec<Vec<u8>>>,
    mined: Mutex<HashMap<String, u64>>,
    broken_receipts: Mutex<HashSet<String>>,
    receipt_calls: AtomicU64,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_submissions(&self, fail: bool) {
        self.fail_submit.store(fail, Ordering::SeqCst);
    }

    pub fn delay_submissions(&self, delay: Duration) {
        *self.submit_delay.lock().unwrap() = Some(delay);
    }

    pub fn delay_receipts(&self, delay: Duration) {
        *self.receipt_delay.lock().unwrap() = Some(delay);
    }

    /// Make `tx_hash` appear mined in `block_number`.
    pub fn mine(&self, tx_hash: &str, block_number: u64) {
        self.mined.lock().unwrap().insert(tx_hash.to_string(), block_number);
    }

    /// Make receipt lookups for `tx_hash` fail.
    pub fn break_receipt(&self, tx_hash: &str) {
        self.broken_receipts.lock().unwrap().insert(tx_hash.to_string());
    }

    pub fn submissions(&self) -> Vec<Vec<u8>> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn receipt_calls(&self) -> u64 {
        self.receipt_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExternalLedgerClient for MockLedger {
    fn name(&self) -> &str {
        "mock"
    }

    async fn submit(&self, payload: &[u8]) -> Result<SubmittedTx> {
        let delay = *self.submit_delay.lock().unwrap();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(ProvenanceError::LedgerSubmission("mock: rpc unavailable".into()));
        }
        self.submitted.lock().unwrap().push(payload.to_vec());
        let n = self.next_tx.fetch_add(1, Ordering::SeqCst);
        Ok(SubmittedTx {
            tx_hash: format!("0x{n:064x}"),
            block_number: None,
            chain_id: MOCK_CHAIN_ID,
        })
    }

    async fn get_receipt(&self, tx_hash: &str) -> Result<Option<TxReceipt>> {
        self.receipt_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.receipt_delay.lock().unwrap();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        if self.broken_receipts.lock().unwrap().contains(tx_hash) {
            return Err(ProvenanceError::ReceiptLookup(format!("mock: {tx_hash} lookup failed")));
        }
        Ok(self.mined.lock().unwrap().get(tx_hash).map(|&block| TxReceipt {
            tx_hash: tx_hash.to_string(),
            block_number: Some(block),
            success: true,
        }))
    }
}

pub fn registration(model_id: &str, version: &str) -> BlockPayload {
    ModelRegistration {
        model_id: model_id.into(),
        version: Some(version.into()),
        ..Default::default()
    }
    .into()
}
