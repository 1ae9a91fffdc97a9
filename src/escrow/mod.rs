//! Escrow deal state machine.
//!
//! Drives a two-party deal from creation through deposit verification
//! to settlement. Transitions are monotonic and persisted before any
//! external side effect they imply: the move to `processing` is written
//! to storage before the settlement instruction goes out, so a crash
//! between the two resumes as an at-least-once retry of an idempotent
//! settlement rather than a lost deal.
//!
//! Mutations on one deal are serialized through a per-deal async lock;
//! independent deals proceed in parallel.

pub mod ledger;
pub mod watcher;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ServiceError, ServiceResult};
use crate::escrow::ledger::LedgerClient;
use crate::notify::{format_deal_update, Notifier};
use crate::storage::Storage;
use crate::types::{AssetKind, Deal, DealStatus, LedgerTx, RequiredAsset};

/// Deposit memo prefix; the suffix is 12 uppercase hex digits.
const MEMO_PREFIX: &str = "GS-";

/// External settlement mechanism. Delivery must be idempotent: the
/// state machine may replay the instruction after a crash.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Settlement: Send + Sync {
    async fn deliver(&self, deal: &Deal) -> Result<()>;
}

/// Stand-in settlement backend that only records intent in the log.
pub struct LoggingSettlement;

#[async_trait]
impl Settlement for LoggingSettlement {
    async fn deliver(&self, deal: &Deal) -> Result<()> {
        info!(deal_id = %deal.id, "Settlement instructed");
        Ok(())
    }
}

/// Request payload for creating a deal.
#[derive(Debug, Clone)]
pub struct DealRequest {
    pub initiator_id: i64,
    pub offer_slug: String,
    pub required: RequiredAsset,
}

pub struct EscrowService {
    storage: Arc<Storage>,
    ledger: Arc<dyn LedgerClient>,
    settlement: Arc<dyn Settlement>,
    notifier: Arc<dyn Notifier>,
    deposit_expiry: Duration,
    /// Per-deal transition locks.
    locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl EscrowService {
    pub fn new(
        storage: Arc<Storage>,
        ledger: Arc<dyn LedgerClient>,
        settlement: Arc<dyn Settlement>,
        notifier: Arc<dyn Notifier>,
        deposit_expiry_secs: u64,
    ) -> Self {
        Self {
            storage,
            ledger,
            settlement,
            notifier,
            deposit_expiry: Duration::seconds(deposit_expiry_secs as i64),
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn deal_lock(&self, id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks.entry(id).or_default().clone()
    }

    /// Terminal deals never transition again, so their lock entry can
    /// go. Holders of a clone are unaffected.
    fn drop_lock(&self, id: Uuid) {
        let mut locks = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks.remove(&id);
    }

    // -----------------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------------

    /// Validate and persist a new deal, then open it for deposits.
    pub async fn create_deal(&self, request: DealRequest) -> ServiceResult<Deal> {
        self.validate(&request).await?;

        let now = Utc::now();
        let mut deal = Deal {
            id: Uuid::new_v4(),
            status: DealStatus::Created,
            initiator_id: request.initiator_id,
            offer_slug: request.offer_slug,
            required: request.required,
            memo_code: generate_memo_code(),
            initiator_deposited: false,
            counterparty_deposited: false,
            created_at: now,
            updated_at: now,
        };

        self.storage.insert_deal(&deal).await.map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                ServiceError::DuplicateMemoCode(deal.memo_code.clone())
            }
            _ => ServiceError::Persistence(e),
        })?;
        info!(deal_id = %deal.id, memo = %deal.memo_code, "Deal created");

        // Both parties are instructed to deposit right away, which is
        // what `waiting_deposit` means.
        self.transition(&mut deal, DealStatus::WaitingDeposit).await?;
        Ok(deal)
    }

    async fn validate(&self, request: &DealRequest) -> ServiceResult<()> {
        if self
            .storage
            .get_catalog_item(&request.offer_slug)
            .await?
            .is_none()
        {
            return Err(ServiceError::ItemNotFound(request.offer_slug.clone()));
        }

        let required = &request.required;
        match required.kind {
            AssetKind::Nft => {
                let slug = required.slug.as_deref().ok_or_else(|| {
                    ServiceError::InvalidDealSpec("NFT counter-asset needs a gift slug".into())
                })?;
                if slug == request.offer_slug {
                    return Err(ServiceError::InvalidDealSpec(
                        "offered and required gift are identical".into(),
                    ));
                }
                if self.storage.get_catalog_item(slug).await?.is_none() {
                    return Err(ServiceError::InvalidDealSpec(format!(
                        "unknown required gift: {slug}"
                    )));
                }
            }
            AssetKind::Ton | AssetKind::Jetton => {
                match required.amount {
                    Some(a) if a > Decimal::ZERO => {}
                    _ => {
                        return Err(ServiceError::InvalidDealSpec(
                            "fungible counter-asset needs a positive amount".into(),
                        ))
                    }
                }
                if required.kind == AssetKind::Jetton && required.token_contract.is_none() {
                    return Err(ServiceError::InvalidDealSpec(
                        "jetton counter-asset needs a token contract".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Deposit verification
    // -----------------------------------------------------------------------

    /// Poll the ledger for transactions tagged with the deal's memo and
    /// update the deposit flags. When both flags are set the deal moves
    /// to `processing` and settlement begins.
    pub async fn check_deposits(&self, deal_id: Uuid) -> ServiceResult<Deal> {
        let lock = self.deal_lock(deal_id);
        let _guard = lock.lock().await;

        let mut deal = self
            .storage
            .get_deal(deal_id)
            .await?
            .ok_or(ServiceError::DealNotFound(deal_id))?;

        match deal.status {
            DealStatus::WaitingDeposit => {}
            // Replaying settlement for a crashed deal is also a "check".
            DealStatus::Processing => {
                self.complete_settlement(&mut deal).await?;
                self.drop_lock(deal.id);
                return Ok(deal);
            }
            _ => return Ok(deal),
        }

        let txs = self
            .ledger
            .transactions_with_memo(&deal.memo_code, deal.created_at)
            .await
            .map_err(|e| ServiceError::Ledger(e.to_string()))?;

        let mut changed = false;
        for tx in &txs {
            if !deal.initiator_deposited && matches_offer(&deal, tx) {
                deal.initiator_deposited = true;
                changed = true;
                info!(deal_id = %deal.id, tx = %tx.tx_hash, "Initiator deposit matched");
            } else if !deal.counterparty_deposited && matches_required(&deal.required, tx) {
                deal.counterparty_deposited = true;
                changed = true;
                info!(deal_id = %deal.id, tx = %tx.tx_hash, "Counterparty deposit matched");
            }
        }

        if changed {
            deal.updated_at = Utc::now();
            self.storage.update_deal(&deal).await?;
        }

        if deal.both_deposited() {
            self.transition(&mut deal, DealStatus::Processing).await?;
            self.complete_settlement(&mut deal).await?;
        }
        if deal.status.is_terminal() {
            self.drop_lock(deal.id);
        }
        Ok(deal)
    }

    /// Instruct settlement for a deal already persisted as processing,
    /// then mark it completed. Safe to replay.
    async fn complete_settlement(&self, deal: &mut Deal) -> ServiceResult<()> {
        self.settlement
            .deliver(deal)
            .await
            .map_err(|e| ServiceError::Ledger(e.to_string()))?;
        self.transition(deal, DealStatus::Completed).await
    }

    // -----------------------------------------------------------------------
    // Cancellation and expiry
    // -----------------------------------------------------------------------

    pub async fn cancel(&self, deal_id: Uuid) -> ServiceResult<Deal> {
        let lock = self.deal_lock(deal_id);
        let _guard = lock.lock().await;

        let mut deal = self
            .storage
            .get_deal(deal_id)
            .await?
            .ok_or(ServiceError::DealNotFound(deal_id))?;
        self.transition(&mut deal, DealStatus::Cancelled).await?;
        self.drop_lock(deal.id);
        Ok(deal)
    }

    /// Cancel deals stuck in `waiting_deposit` past the expiry window.
    /// Returns how many were cancelled.
    pub async fn expire_stale_deals(&self) -> ServiceResult<usize> {
        let waiting = self.storage.deals_with_status(DealStatus::WaitingDeposit).await?;
        let cutoff = Utc::now() - self.deposit_expiry;

        let mut expired = 0;
        for deal in waiting {
            if deal.created_at < cutoff {
                warn!(deal_id = %deal.id, "Deal expired without deposits");
                if self.cancel(deal.id).await.is_ok() {
                    expired += 1;
                }
            }
        }
        Ok(expired)
    }

    /// Deals persisted as `processing` that need their settlement replayed.
    pub async fn resumable_deals(&self) -> ServiceResult<Vec<Deal>> {
        Ok(self.storage.deals_with_status(DealStatus::Processing).await?)
    }

    pub async fn get_deal(&self, deal_id: Uuid) -> ServiceResult<Deal> {
        self.storage
            .get_deal(deal_id)
            .await?
            .ok_or(ServiceError::DealNotFound(deal_id))
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    async fn transition(&self, deal: &mut Deal, next: DealStatus) -> ServiceResult<()> {
        if !deal.status.can_transition(next) {
            return Err(ServiceError::InvalidTransition {
                from: deal.status,
                to: next,
            });
        }
        deal.status = next;
        deal.updated_at = Utc::now();
        self.storage.update_deal(deal).await?;
        info!(deal_id = %deal.id, status = %deal.status, "Deal transitioned");

        if let Err(e) = self.notifier.send(&format_deal_update(deal)).await {
            // Notification failures never affect the deal itself.
            warn!(deal_id = %deal.id, error = %e, "Deal notification failed");
        }
        Ok(())
    }
}

/// Whether a ledger transaction delivers the initiator's offered gift.
fn matches_offer(deal: &Deal, tx: &LedgerTx) -> bool {
    tx.asset_slug.as_deref() == Some(deal.offer_slug.as_str())
}

/// Whether a ledger transaction satisfies the required counter-asset:
/// exact amount for fungibles, exact slug for gifts.
fn matches_required(required: &RequiredAsset, tx: &LedgerTx) -> bool {
    match required.kind {
        AssetKind::Nft => tx.asset_slug.as_deref() == required.slug.as_deref(),
        AssetKind::Ton => {
            tx.asset_slug.is_none()
                && tx.token_contract.is_none()
                && Some(tx.amount) == required.amount
        }
        AssetKind::Jetton => {
            tx.token_contract.as_deref() == required.token_contract.as_deref()
                && Some(tx.amount) == required.amount
        }
    }
}

/// `GS-` followed by 12 uppercase hex digits from a fresh UUID.
pub fn generate_memo_code() -> String {
    let id = Uuid::new_v4().simple().to_string().to_uppercase();
    format!("{MEMO_PREFIX}{}", &id[..12])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
