//! MRKT integration.
//!
//! Per-item JSON API. Requires an API key sent as `x-api-key`; the key
//! is resolved from the environment at registry build time and held in
//! a `Secret` so it never appears in logs.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use tracing::debug;

use crate::markets::MarketplaceParser;
use crate::types::{PriceQuote, QuoteAttributes};

const API_URL: &str = "https://api.mrkt.market/api/v1/gifts";

#[derive(Debug, Deserialize)]
struct MrktGiftResponse {
    #[serde(default)]
    floor: Option<Decimal>,
    #[serde(default)]
    currency: Option<String>,
    /// Serial number of the floor listing, when MRKT exposes it.
    #[serde(default, rename = "serialNumber")]
    serial_number: Option<u32>,
}

pub struct MrktParser {
    http: Client,
    api_key: Secret<String>,
}

impl MrktParser {
    pub fn new(api_key: String) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to build MRKT HTTP client")?;
        Ok(Self {
            http,
            api_key: Secret::new(api_key),
        })
    }

    fn convert(&self, slug: &str, resp: MrktGiftResponse) -> Option<PriceQuote> {
        let price = resp.floor?;
        if price <= Decimal::ZERO {
            return None;
        }
        let attributes = resp
            .serial_number
            .map(|s| QuoteAttributes::new(Some(s), Default::default()));
        Some(PriceQuote {
            source: self.name().to_string(),
            slug: slug.to_string(),
            price,
            currency: resp.currency.unwrap_or_else(|| "TON".to_string()),
            scanned_at: Utc::now(),
            attributes,
        })
    }
}

#[async_trait]
impl MarketplaceParser for MrktParser {
    fn name(&self) -> &str {
        "MRKT"
    }

    async fn fetch_floor(&self, slug: &str) -> Result<Option<PriceQuote>> {
        let url = format!("{API_URL}/{}", urlencoding::encode(slug));
        debug!(slug, "Fetching MRKT floor");

        let resp = self
            .http
            .get(&url)
            .header("x-api-key", self.api_key.expose_secret())
            .send()
            .await
            .with_context(|| format!("MRKT request failed for '{slug}'"))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            anyhow::bail!("MRKT returned {} for '{slug}'", resp.status());
        }

        let body: MrktGiftResponse = resp
            .json()
            .await
            .with_context(|| format!("Failed to parse MRKT response for '{slug}'"))?;

        Ok(self.convert(slug, body))
    }
}
