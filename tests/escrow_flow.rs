//! Escrow lifecycle: creation, ledger-matched deposits, settlement,
//! cancellation rules and deposit expiry.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use rust_decimal_macros::dec;

use common::{catalog_item, ledger_tx, RecordingSettlement, ScriptedLedger};
use giftscan::error::ServiceError;
use giftscan::escrow::{DealRequest, EscrowService};
use giftscan::notify::NoopNotifier;
use giftscan::storage::Storage;
use giftscan::types::{AssetKind, DealStatus, RequiredAsset};

struct Harness {
    escrow: Arc<EscrowService>,
    ledger: Arc<ScriptedLedger>,
    settlement: Arc<RecordingSettlement>,
}

async fn harness(deposit_expiry_secs: u64) -> Harness {
    let storage = Arc::new(Storage::connect("sqlite::memory:").await.unwrap());
    storage
        .seed_catalog(&[
            catalog_item("plushpepe", "Plush Pepe"),
            catalog_item("swisswatch", "Swiss Watch"),
        ])
        .await
        .unwrap();

    let ledger = Arc::new(ScriptedLedger::default());
    let settlement = Arc::new(RecordingSettlement::default());
    let escrow = Arc::new(EscrowService::new(
        storage,
        ledger.clone(),
        settlement.clone(),
        Arc::new(NoopNotifier),
        deposit_expiry_secs,
    ));
    Harness {
        escrow,
        ledger,
        settlement,
    }
}

fn ton_deal(amount: rust_decimal::Decimal) -> DealRequest {
    DealRequest {
        initiator_id: 42,
        offer_slug: "plushpepe".into(),
        required: RequiredAsset {
            kind: AssetKind::Ton,
            slug: None,
            token_contract: None,
            amount: Some(amount),
        },
    }
}

#[tokio::test]
async fn test_full_lifecycle_to_completed() {
    let h = harness(86400).await;
    let deal = h.escrow.create_deal(ton_deal(dec!(100))).await.unwrap();

    assert_eq!(deal.status, DealStatus::WaitingDeposit);
    assert!(deal.memo_code.starts_with("GS-"));
    assert!(!deal.initiator_deposited);

    // No transactions yet: nothing changes.
    let deal = h.escrow.check_deposits(deal.id).await.unwrap();
    assert_eq!(deal.status, DealStatus::WaitingDeposit);
    assert!(!deal.both_deposited());

    // Initiator sends the offered gift, tagged with the memo.
    h.ledger
        .push(ledger_tx(&deal.memo_code, dec!(0), Some("plushpepe"), "tx-1"));
    let deal = h.escrow.check_deposits(deal.id).await.unwrap();
    assert!(deal.initiator_deposited);
    assert!(!deal.counterparty_deposited);
    assert_eq!(deal.status, DealStatus::WaitingDeposit);
    assert_eq!(h.settlement.deliveries.load(Ordering::SeqCst), 0);

    // Counterparty sends the exact required TON amount.
    h.ledger
        .push(ledger_tx(&deal.memo_code, dec!(100), None, "tx-2"));
    let deal = h.escrow.check_deposits(deal.id).await.unwrap();
    assert_eq!(deal.status, DealStatus::Completed);
    assert!(deal.both_deposited());
    assert_eq!(h.settlement.deliveries.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_repeated_observation_does_not_double_count() {
    let h = harness(86400).await;
    let deal = h.escrow.create_deal(ton_deal(dec!(50))).await.unwrap();

    let tx = ledger_tx(&deal.memo_code, dec!(0), Some("plushpepe"), "tx-dup");
    h.ledger.push(tx.clone());
    h.ledger.push(tx);

    let deal = h.escrow.check_deposits(deal.id).await.unwrap();
    assert!(deal.initiator_deposited);
    // Two observations of the same deposit never set the other flag.
    assert!(!deal.counterparty_deposited);
    assert_eq!(deal.status, DealStatus::WaitingDeposit);

    // Re-checking stays idempotent.
    let deal = h.escrow.check_deposits(deal.id).await.unwrap();
    assert!(deal.initiator_deposited);
    assert!(!deal.counterparty_deposited);
}

#[tokio::test]
async fn test_wrong_amount_does_not_match() {
    let h = harness(86400).await;
    let deal = h.escrow.create_deal(ton_deal(dec!(100))).await.unwrap();

    h.ledger
        .push(ledger_tx(&deal.memo_code, dec!(99), None, "tx-short"));
    let deal = h.escrow.check_deposits(deal.id).await.unwrap();
    assert!(!deal.counterparty_deposited);
    assert_eq!(deal.status, DealStatus::WaitingDeposit);
}

#[tokio::test]
async fn test_nft_for_nft_deal() {
    let h = harness(86400).await;
    let deal = h
        .escrow
        .create_deal(DealRequest {
            initiator_id: 7,
            offer_slug: "plushpepe".into(),
            required: RequiredAsset {
                kind: AssetKind::Nft,
                slug: Some("swisswatch".into()),
                token_contract: None,
                amount: None,
            },
        })
        .await
        .unwrap();

    h.ledger
        .push(ledger_tx(&deal.memo_code, dec!(0), Some("swisswatch"), "tx-cp"));
    h.ledger
        .push(ledger_tx(&deal.memo_code, dec!(0), Some("plushpepe"), "tx-init"));

    let deal = h.escrow.check_deposits(deal.id).await.unwrap();
    assert_eq!(deal.status, DealStatus::Completed);
}

#[tokio::test]
async fn test_invalid_specs_rejected() {
    let h = harness(86400).await;

    // Identical offered and required gift.
    let err = h
        .escrow
        .create_deal(DealRequest {
            initiator_id: 1,
            offer_slug: "plushpepe".into(),
            required: RequiredAsset {
                kind: AssetKind::Nft,
                slug: Some("plushpepe".into()),
                token_contract: None,
                amount: None,
            },
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidDealSpec(_)));

    // Unknown offered gift.
    let err = h
        .escrow
        .create_deal(DealRequest {
            initiator_id: 1,
            offer_slug: "missing".into(),
            required: RequiredAsset {
                kind: AssetKind::Ton,
                slug: None,
                token_contract: None,
                amount: Some(dec!(1)),
            },
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ItemNotFound(_)));

    // Jetton without a token contract.
    let err = h
        .escrow
        .create_deal(DealRequest {
            initiator_id: 1,
            offer_slug: "plushpepe".into(),
            required: RequiredAsset {
                kind: AssetKind::Jetton,
                slug: None,
                token_contract: None,
                amount: Some(dec!(10)),
            },
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidDealSpec(_)));
}

#[tokio::test]
async fn test_cancel_rules() {
    let h = harness(86400).await;
    let deal = h.escrow.create_deal(ton_deal(dec!(10))).await.unwrap();

    // Cancellable while waiting for deposits.
    let cancelled = h.escrow.cancel(deal.id).await.unwrap();
    assert_eq!(cancelled.status, DealStatus::Cancelled);

    // Terminal states reject further transitions.
    let err = h.escrow.cancel(deal.id).await.unwrap_err();
    assert!(matches!(err, ServiceError::InvalidTransition { .. }));

    // A completed deal cannot be cancelled either.
    let deal = h.escrow.create_deal(ton_deal(dec!(20))).await.unwrap();
    h.ledger
        .push(ledger_tx(&deal.memo_code, dec!(0), Some("plushpepe"), "a"));
    h.ledger.push(ledger_tx(&deal.memo_code, dec!(20), None, "b"));
    let deal = h.escrow.check_deposits(deal.id).await.unwrap();
    assert_eq!(deal.status, DealStatus::Completed);
    let err = h.escrow.cancel(deal.id).await.unwrap_err();
    assert!(matches!(err, ServiceError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_expiry_cancels_stale_deals() {
    let h = harness(0).await;
    let deal = h.escrow.create_deal(ton_deal(dec!(10))).await.unwrap();

    // With a zero-second window the deal is already past expiry.
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    let expired = h.escrow.expire_stale_deals().await.unwrap();
    assert_eq!(expired, 1);

    let deal = h.escrow.get_deal(deal.id).await.unwrap();
    assert_eq!(deal.status, DealStatus::Cancelled);
}

#[tokio::test]
async fn test_memo_codes_unique_across_deals() {
    let h = harness(86400).await;
    let a = h.escrow.create_deal(ton_deal(dec!(1))).await.unwrap();
    let b = h.escrow.create_deal(ton_deal(dec!(2))).await.unwrap();
    assert_ne!(a.memo_code, b.memo_code);
}
