//! Shared test doubles for integration tests.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use giftscan::escrow::ledger::LedgerClient;
use giftscan::escrow::Settlement;
use giftscan::markets::MarketplaceParser;
use giftscan::types::{CatalogItem, Deal, LedgerTx, PriceQuote};

/// Marketplace source with canned prices, optional bulk mode and an
/// optional hard failure.
pub struct MockSource {
    pub name: String,
    pub bulk: bool,
    pub prices: Vec<(String, Decimal)>,
    pub fail: bool,
}

impl MockSource {
    pub fn new(name: &str, prices: &[(&str, Decimal)]) -> Self {
        Self {
            name: name.into(),
            bulk: false,
            prices: prices
                .iter()
                .map(|(s, p)| (s.to_string(), *p))
                .collect(),
            fail: false,
        }
    }

    pub fn failing(name: &str) -> Self {
        Self {
            name: name.into(),
            bulk: false,
            prices: Vec::new(),
            fail: true,
        }
    }

    pub fn bulk(mut self) -> Self {
        self.bulk = true;
        self
    }

    fn quote(&self, slug: &str, price: Decimal) -> PriceQuote {
        PriceQuote {
            source: self.name.clone(),
            slug: slug.to_string(),
            price,
            currency: "TON".into(),
            scanned_at: Utc::now(),
            attributes: None,
        }
    }
}

#[async_trait]
impl MarketplaceParser for MockSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_bulk(&self) -> bool {
        self.bulk
    }

    async fn fetch_floor(&self, slug: &str) -> Result<Option<PriceQuote>> {
        if self.fail {
            anyhow::bail!("{} unavailable", self.name);
        }
        Ok(self
            .prices
            .iter()
            .find(|(s, _)| s == slug)
            .map(|(s, p)| self.quote(s, *p)))
    }

    async fn fetch_all(&self) -> Result<Vec<PriceQuote>> {
        if self.fail {
            anyhow::bail!("{} unavailable", self.name);
        }
        Ok(self
            .prices
            .iter()
            .map(|(s, p)| self.quote(s, *p))
            .collect())
    }
}

/// Ledger whose transaction list is pushed by the test as the scenario
/// unfolds.
#[derive(Default)]
pub struct ScriptedLedger {
    txs: Mutex<Vec<LedgerTx>>,
}

impl ScriptedLedger {
    pub fn push(&self, tx: LedgerTx) {
        self.txs.lock().unwrap().push(tx);
    }
}

#[async_trait]
impl LedgerClient for ScriptedLedger {
    async fn transactions_with_memo(
        &self,
        memo: &str,
        _since: DateTime<Utc>,
    ) -> Result<Vec<LedgerTx>> {
        Ok(self
            .txs
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.memo == memo)
            .cloned()
            .collect())
    }
}

/// Settlement backend counting delivery instructions.
#[derive(Default)]
pub struct RecordingSettlement {
    pub deliveries: AtomicUsize,
}

#[async_trait]
impl Settlement for RecordingSettlement {
    async fn deliver(&self, _deal: &Deal) -> Result<()> {
        self.deliveries.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn catalog_item(slug: &str, name: &str) -> CatalogItem {
    CatalogItem {
        slug: slug.into(),
        name: name.into(),
        image_url: None,
        total_supply: Some(5000),
    }
}

pub fn ledger_tx(
    memo: &str,
    amount: Decimal,
    asset_slug: Option<&str>,
    tx_hash: &str,
) -> LedgerTx {
    LedgerTx {
        tx_hash: tx_hash.into(),
        sender: "EQC_wallet".into(),
        amount,
        asset_slug: asset_slug.map(String::from),
        token_contract: None,
        memo: memo.into(),
        observed_at: Utc::now(),
    }
}
