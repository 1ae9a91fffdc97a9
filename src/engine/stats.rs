//! Market statistics derived from quote history.
//!
//! Everything here is computed from the `market_snapshots` table; there
//! is no separate listings or sales feed. Trend and velocity come from
//! the floor-price history across recent passes, liquidity from how
//! many registered sources currently quote the item.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::engine::valuation::ValuationEngine;
use crate::error::{ServiceError, ServiceResult};
use crate::storage::Storage;
use crate::types::RarityTier;

/// How many recent scan passes feed the trend and velocity windows.
const HISTORY_PASSES: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceTrend {
    Up,
    Down,
    Flat,
    /// Not enough pass history to call a direction.
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketStats {
    pub slug: String,
    /// Current cross-source floor.
    pub floor: Option<Decimal>,
    pub trend: PriceTrend,
    /// Fraction of registered sources quoting the item right now, 0-1.
    pub liquidity_score: f64,
    /// Floor changes across the recent history window.
    pub scan_velocity: u32,
    /// Lowest current price per rarity tier, keyed by tier name.
    pub tier_floors: BTreeMap<String, Decimal>,
    /// Cheapest premium-tier listing over the cheapest common one.
    pub premium_vs_common: Option<f64>,
}

pub struct MarketStatsService {
    storage: Arc<Storage>,
    valuation: Arc<ValuationEngine>,
    source_count: usize,
}

impl MarketStatsService {
    pub fn new(storage: Arc<Storage>, valuation: Arc<ValuationEngine>, source_count: usize) -> Self {
        Self {
            storage,
            valuation,
            source_count,
        }
    }

    pub async fn compute(&self, slug: &str) -> ServiceResult<MarketStats> {
        if self.storage.get_catalog_item(slug).await?.is_none() {
            return Err(ServiceError::ItemNotFound(slug.to_string()));
        }

        let quotes = self.storage.latest_quotes(slug).await?;
        let history = self.storage.floor_history(slug, HISTORY_PASSES).await?;
        let floors: Vec<Decimal> = history.iter().map(|(_, p)| *p).collect();

        let floor = quotes
            .iter()
            .filter(|q| q.price > Decimal::ZERO)
            .map(|q| q.price)
            .min();

        let liquidity_score = if self.source_count == 0 {
            0.0
        } else {
            (quotes.len() as f64 / self.source_count as f64).clamp(0.0, 1.0)
        };

        let mut tier_floors: BTreeMap<String, Decimal> = BTreeMap::new();
        let mut common_floor: Option<Decimal> = None;
        let mut premium_floor: Option<Decimal> = None;
        for q in &quotes {
            if q.price <= Decimal::ZERO {
                continue;
            }
            // Listings without attributes count as common.
            let tier = match &q.attributes {
                Some(a) if !a.is_empty() => self.valuation.classify(slug, a),
                _ => RarityTier::Common,
            };
            if tier == RarityTier::Common {
                common_floor = Some(common_floor.map_or(q.price, |p| p.min(q.price)));
                continue;
            }
            premium_floor = Some(premium_floor.map_or(q.price, |p| p.min(q.price)));
            tier_floors
                .entry(tier.as_str().to_string())
                .and_modify(|p| *p = (*p).min(q.price))
                .or_insert(q.price);
        }

        Ok(MarketStats {
            slug: slug.to_string(),
            floor,
            trend: trend_of(&floors),
            liquidity_score,
            scan_velocity: velocity_of(&floors),
            tier_floors,
            premium_vs_common: premium_vs_common(premium_floor, common_floor),
        })
    }
}

/// Median of an unsorted set of prices.
pub fn median(values: &[Decimal]) -> Option<Decimal> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some((sorted[mid - 1] + sorted[mid]) / Decimal::from(2))
    }
}

/// Trend over a floor history ordered oldest to newest: the median of
/// the oldest three passes against the median of the newest three, with
/// a 5% dead band. Needs six passes so the windows never overlap.
pub fn trend_of(floors: &[Decimal]) -> PriceTrend {
    if floors.len() < 6 {
        return PriceTrend::Unknown;
    }
    let oldest = match median(&floors[..3]) {
        Some(m) if m > Decimal::ZERO => m,
        _ => return PriceTrend::Unknown,
    };
    let newest = match median(&floors[floors.len() - 3..]) {
        Some(m) => m,
        None => return PriceTrend::Unknown,
    };

    let ratio = match (newest / oldest).to_f64() {
        Some(r) => r,
        None => return PriceTrend::Unknown,
    };
    if ratio > 1.05 {
        PriceTrend::Up
    } else if ratio < 0.95 {
        PriceTrend::Down
    } else {
        PriceTrend::Flat
    }
}

/// Ratio of the cheapest premium-tier listing to the cheapest common
/// one. `None` when either side has no listing.
pub fn premium_vs_common(
    premium_floor: Option<Decimal>,
    common_floor: Option<Decimal>,
) -> Option<f64> {
    match (premium_floor, common_floor) {
        (Some(p), Some(c)) if c > Decimal::ZERO => (p / c).to_f64(),
        _ => None,
    }
}

/// Number of floor changes between consecutive passes.
pub fn velocity_of(floors: &[Decimal]) -> u32 {
    floors.windows(2).filter(|w| w[0] != w[1]).count() as u32
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_median_odd_even() {
        assert_eq!(median(&[dec!(3), dec!(1), dec!(2)]), Some(dec!(2)));
        assert_eq!(median(&[dec!(4), dec!(1)]), Some(dec!(2.5)));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn test_trend_up() {
        let floors = vec![dec!(30), dec!(31), dec!(30), dec!(40), dec!(42), dec!(41)];
        assert_eq!(trend_of(&floors), PriceTrend::Up);
    }

    #[test]
    fn test_trend_down() {
        let floors = vec![dec!(40), dec!(42), dec!(41), dec!(30), dec!(31), dec!(30)];
        assert_eq!(trend_of(&floors), PriceTrend::Down);
    }

    #[test]
    fn test_trend_flat_within_dead_band() {
        let floors = vec![dec!(100), dec!(100), dec!(100), dec!(103), dec!(102), dec!(104)];
        assert_eq!(trend_of(&floors), PriceTrend::Flat);
    }

    #[test]
    fn test_trend_unknown_under_six_passes() {
        assert_eq!(trend_of(&[]), PriceTrend::Unknown);
        assert_eq!(trend_of(&[dec!(50)]), PriceTrend::Unknown);
        // Five points would make the windows overlap.
        let five = vec![dec!(30), dec!(31), dec!(30), dec!(40), dec!(42)];
        assert_eq!(trend_of(&five), PriceTrend::Unknown);
    }

    #[test]
    fn test_premium_vs_common_ratio() {
        assert_eq!(premium_vs_common(Some(dec!(50)), Some(dec!(20))), Some(2.5));
        assert_eq!(premium_vs_common(None, Some(dec!(20))), None);
        assert_eq!(premium_vs_common(Some(dec!(50)), None), None);
        assert_eq!(premium_vs_common(Some(dec!(50)), Some(dec!(0))), None);
    }

    #[test]
    fn test_velocity_counts_changes() {
        let floors = vec![dec!(30), dec!(30), dec!(33), dec!(33), dec!(31)];
        assert_eq!(velocity_of(&floors), 2);
        assert_eq!(velocity_of(&[]), 0);
    }
}
