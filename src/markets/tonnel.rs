//! Tonnel integration.
//!
//! Tonnel exposes a bulk filter-stats endpoint that returns the current
//! floor for every gift collection in one POST. The endpoint is heavily
//! rate limited, so the registry runs it with a concurrency of one and
//! the scanner prefers the bulk path over per-item lookups.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use tracing::debug;

use crate::markets::{slugify, MarketplaceParser};
use crate::types::PriceQuote;

const API_URL: &str = "https://gifts.tonnel.network/api/filterStats";

#[derive(Debug, Deserialize)]
struct TonnelStatsResponse {
    #[serde(default)]
    gifts: Vec<TonnelGiftStat>,
}

#[derive(Debug, Deserialize)]
struct TonnelGiftStat {
    /// Display name, e.g. "Plush Pepe". Normalised via `slugify`.
    #[serde(rename = "giftName")]
    gift_name: String,
    #[serde(default, rename = "floorPrice")]
    floor_price: Option<Decimal>,
}

pub struct TonnelParser {
    http: Client,
    auth_token: Secret<String>,
}

impl TonnelParser {
    pub fn new(auth_token: String) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(20))
            .build()
            .context("Failed to build Tonnel HTTP client")?;
        Ok(Self {
            http,
            auth_token: Secret::new(auth_token),
        })
    }

    fn convert(&self, stat: TonnelGiftStat) -> Option<PriceQuote> {
        let price = stat.floor_price?;
        if price <= Decimal::ZERO {
            return None;
        }
        let slug = slugify(&stat.gift_name);
        if slug.is_empty() {
            return None;
        }
        Some(PriceQuote {
            source: self.name().to_string(),
            slug,
            price,
            currency: "TON".to_string(),
            scanned_at: Utc::now(),
            attributes: None,
        })
    }
}

#[async_trait]
impl MarketplaceParser for TonnelParser {
    fn name(&self) -> &str {
        "Tonnel"
    }

    fn supports_bulk(&self) -> bool {
        true
    }

    async fn fetch_floor(&self, slug: &str) -> Result<Option<PriceQuote>> {
        // Tonnel has no cheap per-item endpoint; filter the bulk result.
        let quotes = self.fetch_all().await?;
        Ok(quotes.into_iter().find(|q| q.slug == slug))
    }

    async fn fetch_all(&self) -> Result<Vec<PriceQuote>> {
        debug!("Fetching Tonnel filter stats");

        let resp = self
            .http
            .post(API_URL)
            .header("Authorization", self.auth_token.expose_secret())
            .json(&serde_json::json!({ "filter": "floor" }))
            .send()
            .await
            .context("Tonnel request failed")?;

        if !resp.status().is_success() {
            anyhow::bail!("Tonnel returned {}", resp.status());
        }

        let body: TonnelStatsResponse = resp
            .json()
            .await
            .context("Failed to parse Tonnel response")?;

        let quotes: Vec<PriceQuote> = body
            .gifts
            .into_iter()
            .filter_map(|stat| self.convert(stat))
            .collect();

        debug!(count = quotes.len(), "Tonnel floors parsed");
        Ok(quotes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn parser() -> TonnelParser {
        TonnelParser::new("test-token".into()).unwrap()
    }

    #[test]
    fn test_convert_slugifies_name() {
        let stat = TonnelGiftStat {
            gift_name: "Plush Pepe".into(),
            floor_price: Some(dec!(58)),
        };
        let q = parser().convert(stat).unwrap();
        assert_eq!(q.slug, "plushpepe");
        assert_eq!(q.price, dec!(58));
        assert_eq!(q.source, "Tonnel");
    }

    #[test]
    fn test_convert_missing_floor() {
        let stat = TonnelGiftStat {
            gift_name: "Plush Pepe".into(),
            floor_price: None,
        };
        assert!(parser().convert(stat).is_none());
    }

    #[test]
    fn test_convert_zero_floor_rejected() {
        let stat = TonnelGiftStat {
            gift_name: "Plush Pepe".into(),
            floor_price: Some(dec!(0)),
        };
        assert!(parser().convert(stat).is_none());
    }

    #[test]
    fn test_bulk_flag() {
        assert!(parser().supports_bulk());
    }
}
