//! Marketplace integrations.
//!
//! Defines the `MarketplaceParser` trait and provides implementations for:
//! - Fragment — per-item HTML floor-price scrape
//! - GetGems — per-item JSON floor endpoint
//! - MRKT — per-item JSON API (API key required)
//! - Tonnel — bulk filter-stats API (auth token required)
//! - Portals — bulk collection-floors API

pub mod fragment;
pub mod getgems;
pub mod mrkt;
pub mod portals;
pub mod registry;
pub mod tonnel;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::PriceQuote;

/// Abstraction over gift marketplaces.
///
/// A parser reports per-item *absence* as `Ok(None)` — an item simply
/// not listed on that venue is a normal outcome, never an error. An
/// `Err` means the source itself failed (timeout, malformed response,
/// auth failure) and is isolated to that source by the scanner.
#[async_trait]
pub trait MarketplaceParser: Send + Sync {
    /// Source name for registration, logging and tie-breaking.
    fn name(&self) -> &str;

    /// Whether this source can return the whole catalog in one request.
    fn supports_bulk(&self) -> bool {
        false
    }

    /// Fetch the floor price for one gift.
    async fn fetch_floor(&self, slug: &str) -> Result<Option<PriceQuote>>;

    /// Bulk-fetch floor prices for every gift this source lists.
    /// Only meaningful when `supports_bulk()` is true.
    async fn fetch_all(&self) -> Result<Vec<PriceQuote>> {
        Ok(Vec::new())
    }
}

/// Normalise a marketplace display name into a catalog slug:
/// lowercase, alphanumerics only ("Plush Pepe" -> "plushpepe").
pub fn slugify(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}
