//! Price aggregation.
//!
//! Pure derivation of an `AggregateView` from the freshest quote per
//! source. Spread and the arbitrage signal are recomputed on every call
//! and never stored as primary truth.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::types::{AggregateView, CatalogItem, PriceQuote, PriceSummary};

/// Build the aggregate view for one item.
///
/// `quotes` must hold at most one quote per source, ordered by source
/// registration; with strict comparisons the earlier-registered source
/// wins a price tie for both best and worst.
pub fn aggregate(
    item: &CatalogItem,
    quotes: Vec<PriceQuote>,
    rarity_premium: Decimal,
    spread_threshold_pct: f64,
) -> AggregateView {
    let mut best: Option<&PriceQuote> = None;
    let mut worst: Option<&PriceQuote> = None;
    for q in &quotes {
        if best.map_or(true, |b| q.price < b.price) {
            best = Some(q);
        }
        if worst.map_or(true, |w| q.price > w.price) {
            worst = Some(q);
        }
    }

    let summarize = |q: &PriceQuote| PriceSummary {
        source: q.source.clone(),
        price: q.price,
        currency: q.currency.clone(),
    };
    let best_price = best.map(summarize);
    let worst_price = worst.map(summarize);

    let (spread_ton, spread_pct) = match (&best_price, &worst_price) {
        (Some(b), Some(w)) if quotes.len() >= 2 => {
            let spread = w.price - b.price;
            let pct = if b.price > Decimal::ZERO {
                (spread / b.price * Decimal::from(100)).to_f64()
            } else {
                None
            };
            (Some(spread), pct)
        }
        _ => (None, None),
    };

    let arbitrage_signal = spread_pct.map_or(false, |pct| pct >= spread_threshold_pct);

    AggregateView {
        slug: item.slug.clone(),
        name: item.name.clone(),
        image_url: item.image_url.clone(),
        total_supply: item.total_supply,
        quotes,
        best_price,
        worst_price,
        spread_ton,
        spread_pct,
        arbitrage_signal,
        rarity_premium,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
