//! GetGems integration.
//!
//! Per-item floor lookup against the public collection-stats endpoint.
//! No authentication required for read access.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use crate::markets::MarketplaceParser;
use crate::types::PriceQuote;

const API_URL: &str = "https://api.getgems.io/public-api/v1/gifts";

#[derive(Debug, Deserialize)]
struct GetGemsFloorResponse {
    #[serde(default, rename = "floorPrice")]
    floor_price: Option<String>,
    #[serde(default)]
    currency: Option<String>,
}

pub struct GetGemsParser {
    http: Client,
}

impl GetGemsParser {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to build GetGems HTTP client")?;
        Ok(Self { http })
    }

    /// Convert the API payload into a quote; None when not listed.
    fn convert(&self, slug: &str, resp: GetGemsFloorResponse) -> Option<PriceQuote> {
        let raw = resp.floor_price?;
        let price: Decimal = raw.parse().ok()?;
        if price <= Decimal::ZERO {
            return None;
        }
        Some(PriceQuote {
            source: self.name().to_string(),
            slug: slug.to_string(),
            price,
            currency: resp.currency.unwrap_or_else(|| "TON".to_string()),
            scanned_at: Utc::now(),
            attributes: None,
        })
    }
}

#[async_trait]
impl MarketplaceParser for GetGemsParser {
    fn name(&self) -> &str {
        "GetGems"
    }

    async fn fetch_floor(&self, slug: &str) -> Result<Option<PriceQuote>> {
        let url = format!("{API_URL}/{}/floor", urlencoding::encode(slug));
        debug!(slug, "Fetching GetGems floor");

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GetGems request failed for '{slug}'"))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            // Unknown collection on this venue — absence, not failure.
            return Ok(None);
        }
        if !resp.status().is_success() {
            anyhow::bail!("GetGems returned {} for '{slug}'", resp.status());
        }

        let body: GetGemsFloorResponse = resp
            .json()
            .await
            .with_context(|| format!("Failed to parse GetGems response for '{slug}'"))?;

        Ok(self.convert(slug, body))
    }
}
