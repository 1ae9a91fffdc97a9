//! Notification boundary.
//!
//! Arbitrage alerts and deal lifecycle updates go out through the
//! `Notifier` trait. The Telegram implementation is the production
//! path; `NoopNotifier` keeps everything else runnable when no bot is
//! configured. Message formatting is pure and tested separately from
//! delivery.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use tracing::{debug, warn};

use crate::types::{AggregateView, Deal, DealStatus};

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> Result<()>;
}

/// Swallows messages; used when alerts are not configured.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        debug!(len = text.len(), "Notification dropped (no notifier configured)");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Telegram
// ---------------------------------------------------------------------------

pub struct TelegramNotifier {
    http: Client,
    bot_token: Secret<String>,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, chat_id: String) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to build Telegram HTTP client")?;
        Ok(Self {
            http,
            bot_token: Secret::new(bot_token),
            chat_id,
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        let url = format!(
            "https://api.telegram.org/bot{}/sendMessage",
            self.bot_token.expose_secret()
        );
        let resp = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": self.chat_id,
                "text": text,
            }))
            .send()
            .await
            .context("Telegram request failed")?;

        if !resp.status().is_success() {
            warn!(status = %resp.status(), "Telegram rejected notification");
            anyhow::bail!("Telegram returned {}", resp.status());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Message formatting
// ---------------------------------------------------------------------------

/// Arbitrage alert text for one item view. Caller must ensure the view
/// actually carries a signal.
pub fn format_arbitrage_alert(view: &AggregateView) -> String {
    let best = view
        .best_price
        .as_ref()
        .map(|p| format!("{} on {}", p.price, p.source))
        .unwrap_or_else(|| "?".into());
    let worst = view
        .worst_price
        .as_ref()
        .map(|p| format!("{} on {}", p.price, p.source))
        .unwrap_or_else(|| "?".into());
    let pct = view
        .spread_pct
        .map(|p| format!("{p:.1}%"))
        .unwrap_or_else(|| "?".into());
    format!(
        "Arbitrage on {}: buy at {}, sell at {} (spread {})",
        view.name, best, worst, pct
    )
}

/// Deal status update for both parties.
pub fn format_deal_update(deal: &Deal) -> String {
    let line = match deal.status {
        DealStatus::Created => "created, generating deposit instructions",
        DealStatus::WaitingDeposit => "waiting for deposits",
        DealStatus::Processing => "both deposits received, settling",
        DealStatus::Completed => "completed, assets delivered",
        DealStatus::Cancelled => "cancelled",
    };
    format!("Deal {}: {} (memo {})", deal.id, line, deal.memo_code)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AssetKind, PriceSummary, RequiredAsset};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    #[test]
    fn test_arbitrage_alert_text() {
        let view = AggregateView {
            slug: "blingbinky".into(),
            name: "Bling Binky".into(),
            image_url: None,
            total_supply: None,
            quotes: vec![],
            best_price: Some(PriceSummary {
                source: "Fragment".into(),
                price: dec!(33),
                currency: "TON".into(),
            }),
            worst_price: Some(PriceSummary {
                source: "MRKT".into(),
                price: dec!(149),
                currency: "TON".into(),
            }),
            spread_ton: Some(dec!(116)),
            spread_pct: Some(351.5),
            arbitrage_signal: true,
            rarity_premium: dec!(1),
        };
        let text = format_arbitrage_alert(&view);
        assert!(text.contains("Bling Binky"));
        assert!(text.contains("buy at 33 on Fragment"));
        assert!(text.contains("sell at 149 on MRKT"));
        assert!(text.contains("351.5%"));
    }

    #[test]
    fn test_deal_update_text() {
        let deal = Deal {
            id: Uuid::new_v4(),
            status: DealStatus::WaitingDeposit,
            initiator_id: 1,
            offer_slug: "plushpepe".into(),
            required: RequiredAsset {
                kind: AssetKind::Ton,
                slug: None,
                token_contract: None,
                amount: Some(dec!(100)),
            },
            memo_code: "GS-7F3A11112222".into(),
            initiator_deposited: false,
            counterparty_deposited: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let text = format_deal_update(&deal);
        assert!(text.contains("waiting for deposits"));
        assert!(text.contains("GS-7F3A11112222"));
    }

    #[tokio::test]
    async fn test_noop_notifier_always_ok() {
        assert!(NoopNotifier.send("hello").await.is_ok());
    }
}
