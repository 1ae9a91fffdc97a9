//! Fragment integration.
//!
//! Fragment has no public price API; the floor price is scraped from
//! the public gifts page sorted by ascending price. The first listing
//! price on that page is the floor.
//!
//! URL pattern: https://fragment.com/gifts/{slug}?sort=price_asc&filter=sale

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::markets::MarketplaceParser;
use crate::types::PriceQuote;

const BASE_URL: &str = "https://fragment.com/gifts";

/// Plain browser UA — Fragment serves a trimmed page to unknown agents.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// How far past a listing link to look for its price cell.
const PRICE_WINDOW_BYTES: usize = 600;

pub struct FragmentParser {
    http: Client,
}

impl FragmentParser {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build Fragment HTTP client")?;
        Ok(Self { http })
    }
}

#[async_trait]
impl MarketplaceParser for FragmentParser {
    fn name(&self) -> &str {
        "Fragment"
    }

    async fn fetch_floor(&self, slug: &str) -> Result<Option<PriceQuote>> {
        let url = format!("{BASE_URL}/{slug}?sort=price_asc&filter=sale");
        debug!(slug, "Fetching Fragment listing page");

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Fragment request failed for '{slug}'"))?;

        if !resp.status().is_success() {
            anyhow::bail!("Fragment returned {} for '{slug}'", resp.status());
        }

        let html = resp
            .text()
            .await
            .with_context(|| format!("Fragment body read failed for '{slug}'"))?;

        match parse_floor_price(&html, slug) {
            Some(price) => {
                debug!(slug, %price, "Fragment floor parsed");
                Ok(Some(PriceQuote {
                    source: self.name().to_string(),
                    slug: slug.to_string(),
                    price,
                    currency: "TON".to_string(),
                    scanned_at: Utc::now(),
                    attributes: None,
                }))
            }
            None => {
                // Not listed (or the page layout shifted) — absence, not failure.
                warn!(slug, "No Fragment floor price found on page");
                Ok(None)
            }
        }
    }
}

/// Extract the first (lowest) listing price near a `/gift/{slug}-N` link.
///
/// Hand-rolled scan: find each listing link, then take the first
/// price-shaped text node within a bounded window after it.
pub fn parse_floor_price(html: &str, slug: &str) -> Option<Decimal> {
    let marker = format!("/gift/{slug}-");
    let mut from = 0;

    while let Some(pos) = html[from..].find(&marker) {
        let start = from + pos;
        let mut end = (start + PRICE_WINDOW_BYTES).min(html.len());
        while end < html.len() && !html.is_char_boundary(end) {
            end += 1;
        }

        if let Some(price) = first_price_text(&html[start..end]) {
            return Some(price);
        }
        from = start + marker.len();
    }

    None
}

/// First text node in an HTML fragment that parses as a positive price.
fn first_price_text(fragment: &str) -> Option<Decimal> {
    let mut rest = fragment;
    while let Some(gt) = rest.find('>') {
        let after = &rest[gt + 1..];
        let end = after.find('<').unwrap_or(after.len());
        let text = after[..end].trim();

        if let Some(price) = parse_price_text(text) {
            if price > Decimal::ZERO {
                return Some(price);
            }
        }

        if end == after.len() {
            break;
        }
        rest = &after[end..];
    }
    None
}

/// Parse "12,990", "500 TON" or "33.5" into a Decimal. Returns None
/// for anything that isn't purely a formatted number.
pub fn parse_price_text(text: &str) -> Option<Decimal> {
    let text = text.strip_suffix("TON").unwrap_or(text).trim();
    if text.is_empty() {
        return None;
    }
    let cleaned: String = text.chars().filter(|c| *c != ',').collect();
    if !cleaned.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }
    cleaned.parse::<Decimal>().ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
