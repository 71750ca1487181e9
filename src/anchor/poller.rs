/// Confirmation sweep for pending anchors.
///
/// On every tick, each pending anchor's transaction receipt is looked up.
/// Mined transactions promote the anchor to confirmed; unmined ones are left
/// for the next sweep. A failed lookup only affects its own anchor.
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::{with_timeout, ExternalLedgerClient};
use crate::config::PollerConfig;
use crate::error::Result;
use crate::store::{Anchor, LedgerStore};

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub checked: usize,
    pub confirmed: usize,
    pub still_pending: usize,
    pub failed: usize,
}

enum AnchorCheck {
    Confirmed,
    StillPending,
}

pub struct AnchorConfirmationPoller {
    store: Arc<dyn LedgerStore>,
    ledger: Arc<dyn ExternalLedgerClient>,
    config: PollerConfig,
}

impl AnchorConfirmationPoller {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        ledger: Arc<dyn ExternalLedgerClient>,
        config: PollerConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            config,
        }
    }

    /// Check every pending anchor once.
    pub async fn sweep(&self) -> Result<SweepSummary> {
        let pending = self.store.pending_anchors().await?;
        let mut summary = SweepSummary {
            checked: pending.len(),
            ..Default::default()
        };

        if pending.is_empty() {
            debug!("No pending anchors");
            return Ok(summary);
        }
        debug!(count = pending.len(), "Checking pending anchors");

        for anchor in &pending {
            match self.check(anchor).await {
                Ok(AnchorCheck::Confirmed) => summary.confirmed += 1,
                Ok(AnchorCheck::StillPending) => summary.still_pending += 1,
                Err(e) => {
                    warn!(tx_hash = %anchor.tx_hash, error = %e, "Error checking anchor");
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }

    async fn check(&self, anchor: &Anchor) -> Result<AnchorCheck> {
        let receipt = with_timeout(
            "get_receipt",
            self.config.ledger_timeout,
            self.ledger.get_receipt(&anchor.tx_hash),
        )
        .await?;

        let Some((receipt, block_number)) =
            receipt.and_then(|r| r.block_number.map(|n| (r, n)))
        else {
            debug!(tx_hash = %anchor.tx_hash, "Anchor still pending");
            return Ok(AnchorCheck::StillPending);
        };

        if !receipt.success {
            warn!(tx_hash = %anchor.tx_hash, block_number, "Anchor transaction reverted");
        }

        if self
            .store
            .confirm_anchor(anchor.id, block_number, Utc::now())
            .await?
        {
            info!(tx_hash = %anchor.tx_hash, block_number, "Anchor confirmed");
        } else {
            debug!(tx_hash = %anchor.tx_hash, "Anchor already confirmed elsewhere");
        }
        Ok(AnchorCheck::Confirmed)
    }

    /// Sweep on every interval tick until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.config.interval.as_secs(), "Anchor confirmation poller started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!(error = %e, "Anchor confirmation sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Anchor confirmation poller stopped");
                        return;
                    }
                }
            }
        }
    }

    /// Run on a dedicated task.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::store::{AnchorStatus, NewAnchor};
    use crate::test_utils::MockLedger;

    fn config() -> PollerConfig {
        PollerConfig {
            interval: Duration::from_millis(20),
            ledger_timeout: Duration::from_millis(100),
        }
    }

    async fn pending(store: &MemoryStore, tx: &str, last: u64) -> Anchor {
        store
            .insert_anchor(NewAnchor {
                merkle_root: format!("0x{last:064x}"),
                last_block_index: last,
                tx_hash: tx.into(),
                block_number: None,
                chain_id: 1,
            })
            .await
            .unwrap()
    }

    fn poller(store: &Arc<MemoryStore>, ledger: &Arc<MockLedger>) -> AnchorConfirmationPoller {
        AnchorConfirmationPoller::new(store.clone(), ledger.clone(), config())
    }

    #[tokio::test]
    async fn test_mined_anchor_confirmed() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(MockLedger::new());
        pending(&store, "0xaa", 4).await;
        ledger.mine("0xaa", 1234);

        let summary = poller(&store, &ledger).sweep().await.unwrap();
        assert_eq!(summary.confirmed, 1);

        let anchor = store.latest_anchor().await.unwrap().unwrap();
        assert_eq!(anchor.status, AnchorStatus::Confirmed);
        assert_eq!(anchor.block_number, Some(1234));
        assert!(anchor.confirmed_at.is_some());
    }

    #[tokio::test]
    async fn test_unmined_anchor_left_pending() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(MockLedger::new());
        pending(&store, "0xaa", 4).await;

        let summary = poller(&store, &ledger).sweep().await.unwrap();
        assert_eq!(summary.still_pending, 1);
        assert_eq!(store.pending_anchors().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_lookup_failure_isolated() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(MockLedger::new());
        pending(&store, "0xbad", 4).await;
        pending(&store, "0xgood", 9).await;
        ledger.break_receipt("0xbad");
        ledger.mine("0xgood", 99);

        let summary = poller(&store, &ledger).sweep().await.unwrap();
        assert_eq!(
            summary,
            SweepSummary {
                checked: 2,
                confirmed: 1,
                still_pending: 0,
                failed: 1
            }
        );
        let remaining = store.pending_anchors().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].tx_hash, "0xbad");
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(MockLedger::new());
        pending(&store, "0xaa", 4).await;
        ledger.mine("0xaa", 5);
        ledger.delay_receipts(Duration::from_secs(5));

        let summary = poller(&store, &ledger).sweep().await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(store.pending_anchors().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_confirmed_anchors_not_rechecked() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(MockLedger::new());
        pending(&store, "0xaa", 4).await;
        ledger.mine("0xaa", 5);

        let p = poller(&store, &ledger);
        p.sweep().await.unwrap();
        let summary = p.sweep().await.unwrap();
        assert_eq!(summary.checked, 0);
        assert_eq!(ledger.receipt_calls(), 1);
    }

    #[tokio::test]
    async fn test_background_task_confirms_and_stops() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(MockLedger::new());
        pending(&store, "0xaa", 4).await;

        let (tx, rx) = watch::channel(false);
        let handle = Arc::new(poller(&store, &ledger)).spawn(rx);

        ledger.mine("0xaa", 7);
        let confirmed = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if store.pending_anchors().await.unwrap().is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(confirmed.is_ok());

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("poller did not stop")
            .unwrap();
    }
}
