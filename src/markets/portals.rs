//! Portals integration.
//!
//! Bulk collection-floors endpoint. Portals additionally reports which
//! listing sits on the floor (serial, model, backdrop), which feeds the
//! rarity valuation via `QuoteAttributes`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

use crate::markets::{slugify, MarketplaceParser};
use crate::types::{PriceQuote, QuoteAttributes};

const API_URL: &str = "https://portals-market.com/api/collections/floors";

#[derive(Debug, Deserialize)]
struct PortalsFloorsResponse {
    #[serde(default)]
    collections: Vec<PortalsCollectionFloor>,
}

#[derive(Debug, Deserialize)]
struct PortalsCollectionFloor {
    name: String,
    #[serde(default, rename = "floorPrice")]
    floor_price: Option<Decimal>,
    #[serde(default, rename = "floorSerial")]
    floor_serial: Option<u32>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    backdrop: Option<String>,
}

pub struct PortalsParser {
    http: Client,
}

impl PortalsParser {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(20))
            .build()
            .context("Failed to build Portals HTTP client")?;
        Ok(Self { http })
    }

    fn convert(&self, floor: PortalsCollectionFloor) -> Option<PriceQuote> {
        let price = floor.floor_price?;
        if price <= Decimal::ZERO {
            return None;
        }
        let slug = slugify(&floor.name);
        if slug.is_empty() {
            return None;
        }

        let mut traits = BTreeMap::new();
        if let Some(model) = floor.model {
            traits.insert("model".to_string(), model);
        }
        if let Some(backdrop) = floor.backdrop {
            traits.insert("backdrop".to_string(), backdrop);
        }
        let attributes = if floor.floor_serial.is_some() || !traits.is_empty() {
            Some(QuoteAttributes::new(floor.floor_serial, traits))
        } else {
            None
        };

        Some(PriceQuote {
            source: self.name().to_string(),
            slug,
            price,
            currency: "TON".to_string(),
            scanned_at: Utc::now(),
            attributes,
        })
    }
}

#[async_trait]
impl MarketplaceParser for PortalsParser {
    fn name(&self) -> &str {
        "Portals"
    }

    fn supports_bulk(&self) -> bool {
        true
    }

    async fn fetch_floor(&self, slug: &str) -> Result<Option<PriceQuote>> {
        let quotes = self.fetch_all().await?;
        Ok(quotes.into_iter().find(|q| q.slug == slug))
    }

    async fn fetch_all(&self) -> Result<Vec<PriceQuote>> {
        debug!("Fetching Portals collection floors");

        let resp = self
            .http
            .get(API_URL)
            .send()
            .await
            .context("Portals request failed")?;

        if !resp.status().is_success() {
            anyhow::bail!("Portals returned {}", resp.status());
        }

        let body: PortalsFloorsResponse = resp
            .json()
            .await
            .context("Failed to parse Portals response")?;

        let quotes: Vec<PriceQuote> = body
            .collections
            .into_iter()
            .filter_map(|floor| self.convert(floor))
            .collect();

        debug!(count = quotes.len(), "Portals floors parsed");
        Ok(quotes)
    }
}
