//! Deposit watcher.
//!
//! Background loop that polls the ledger for every deal waiting on
//! deposits, replays settlement for deals persisted as `processing`,
//! and cancels deals whose deposit window expired. Ledger failures back
//! off exponentially up to a ceiling and never transition a deal.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::ServiceError;
use crate::escrow::EscrowService;
use crate::storage::Storage;
use crate::types::DealStatus;

pub struct DepositWatcher {
    escrow: Arc<EscrowService>,
    storage: Arc<Storage>,
    poll_interval: Duration,
    max_backoff: Duration,
}

impl DepositWatcher {
    pub fn new(
        escrow: Arc<EscrowService>,
        storage: Arc<Storage>,
        poll_interval_secs: u64,
        max_backoff_secs: u64,
    ) -> Self {
        Self {
            escrow,
            storage,
            poll_interval: Duration::from_secs(poll_interval_secs),
            max_backoff: Duration::from_secs(max_backoff_secs),
        }
    }

    /// Run until the shutdown signal flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.poll_interval.as_secs(), "Deposit watcher started");
        let mut delay = self.poll_interval;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Deposit watcher shutting down");
                    break;
                }
                _ = sleep(delay) => {
                    delay = match self.tick().await {
                        Ok(()) => self.poll_interval,
                        Err(e) => {
                            let next = next_backoff(delay, self.max_backoff);
                            warn!(error = %e, retry_secs = next.as_secs(), "Watcher tick failed");
                            next
                        }
                    };
                }
            }
        }
    }

    /// One polling round. Per-deal errors are isolated within the
    /// round; a storage-level failure aborts it immediately, and ledger
    /// failures are reported at the end so the loop backs off instead
    /// of hammering a down ledger every interval.
    async fn tick(&self) -> Result<(), ServiceError> {
        let waiting = self
            .storage
            .deals_with_status(DealStatus::WaitingDeposit)
            .await?;
        debug!(deals = waiting.len(), "Polling deposits");

        let mut ledger_failures = 0usize;
        for deal in waiting {
            if let Err(e) = self.escrow.check_deposits(deal.id).await {
                match e {
                    ServiceError::Persistence(e) => return Err(ServiceError::Persistence(e)),
                    ServiceError::Ledger(msg) => {
                        ledger_failures += 1;
                        warn!(deal_id = %deal.id, error = %msg, "Ledger query failed");
                    }
                    other => warn!(deal_id = %deal.id, error = %other, "Deposit check failed"),
                }
            }
        }

        // Deals that crashed mid-settlement replay their instruction.
        for deal in self.escrow.resumable_deals().await? {
            if let Err(e) = self.escrow.check_deposits(deal.id).await {
                warn!(deal_id = %deal.id, error = %e, "Settlement replay failed");
            }
        }

        let expired = self.escrow.expire_stale_deals().await?;
        if expired > 0 {
            info!(expired, "Expired stale deals");
        }

        if ledger_failures > 0 {
            return Err(ServiceError::Ledger(format!(
                "{ledger_failures} ledger queries failed this round"
            )));
        }
        Ok(())
    }
}

/// Doubling backoff with a ceiling.
fn next_backoff(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}
