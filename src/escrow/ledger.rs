//! Ledger query client.
//!
//! The escrow state machine never talks to the chain directly; it asks
//! this collaborator for incoming transactions tagged with a deal's
//! memo code. The trait seam keeps the state machine testable with a
//! mocked ledger.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use tracing::debug;

use crate::types::LedgerTx;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Incoming transactions carrying the memo, observed since `since`.
    async fn transactions_with_memo(
        &self,
        memo: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<LedgerTx>>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TxListResponse {
    #[serde(default)]
    transactions: Vec<TxRecord>,
}

#[derive(Debug, Deserialize)]
struct TxRecord {
    #[serde(rename = "txHash")]
    tx_hash: String,
    sender: String,
    amount: Decimal,
    #[serde(default, rename = "assetSlug")]
    asset_slug: Option<String>,
    #[serde(default, rename = "tokenContract")]
    token_contract: Option<String>,
    #[serde(default)]
    memo: String,
    #[serde(rename = "observedAt")]
    observed_at: DateTime<Utc>,
}

pub struct HttpLedgerClient {
    http: Client,
    base_url: String,
    api_key: Option<Secret<String>>,
}

impl HttpLedgerClient {
    pub fn new(base_url: String, api_key: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .context("Failed to build ledger HTTP client")?;
        Ok(Self {
            http,
            base_url,
            api_key: api_key.map(Secret::new),
        })
    }
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn transactions_with_memo(
        &self,
        memo: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<LedgerTx>> {
        let url = format!(
            "{}/v2/transactions?memo={}&since={}",
            self.base_url,
            urlencoding::encode(memo),
            since.timestamp()
        );
        debug!(memo, "Querying ledger for tagged transactions");

        let mut request = self.http.get(&url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }
        let resp = request.send().await.context("Ledger request failed")?;
        if !resp.status().is_success() {
            anyhow::bail!("Ledger returned {}", resp.status());
        }

        let body: TxListResponse = resp.json().await.context("Failed to parse ledger response")?;
        Ok(body
            .transactions
            .into_iter()
            .filter(|t| t.memo == memo)
            .map(|t| LedgerTx {
                tx_hash: t.tx_hash,
                sender: t.sender,
                amount: t.amount,
                asset_slug: t.asset_slug,
                token_contract: t.token_contract,
                memo: t.memo,
                observed_at: t.observed_at,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tx_record_parses_ledger_payload() {
        let json = r#"{
            "transactions": [{
                "txHash": "a1b2",
                "sender": "EQC_wallet",
                "amount": 100.5,
                "memo": "GS-7F3A11112222",
                "observedAt": "2026-08-27T10:00:00Z"
            }]
        }"#;
        let parsed: TxListResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.transactions.len(), 1);
        let tx = &parsed.transactions[0];
        assert_eq!(tx.sender, "EQC_wallet");
        assert_eq!(tx.amount.to_string(), "100.5");
        assert!(tx.asset_slug.is_none());
    }
}
