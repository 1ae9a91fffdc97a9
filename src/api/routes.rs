//! API route handlers.
//!
//! Read handlers are cache-aside over the persisted snapshots: try the
//! cache, rebuild the views on a miss, store the result. Every payload
//! carries `refreshed_at` so callers can judge staleness instead of the
//! endpoint failing when sources are degraded.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::api::{ApiError, AppState};
use crate::cache::query_key;
use crate::engine::aggregator::aggregate;
use crate::engine::stats::MarketStats;
use crate::error::ServiceError;
use crate::types::{AggregateView, Deal, PriceQuote, RequiredAsset};

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct GiftsQuery {
    /// "name" | "best_price" | "spread_pct"
    pub sort_by: Option<String>,
    /// "asc" | "desc"
    pub sort_order: Option<String>,
    pub min_spread_pct: Option<f64>,
    /// Case-insensitive substring match on the gift name.
    pub search: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GiftsResponse {
    pub gifts: Vec<AggregateView>,
    pub meta: GiftsMeta,
}

#[derive(Debug, Serialize)]
pub struct GiftsMeta {
    /// Item count after filters.
    pub total: usize,
    /// Registered marketplace sources.
    pub sources: usize,
    /// When the data underneath was last refreshed by a scan pass.
    pub refreshed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct GiftResponse {
    pub gift: AggregateView,
    pub refreshed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatsQuery {
    pub slug: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateDealRequest {
    pub initiator_id: i64,
    pub offer_slug: String,
    pub required: RequiredAsset,
}

// ---------------------------------------------------------------------------
// View building
// ---------------------------------------------------------------------------

/// Rebuild every aggregate view from the freshest persisted snapshots.
async fn build_views(state: &AppState) -> Result<Vec<AggregateView>, ServiceError> {
    let catalog = state.storage.list_catalog().await?;
    let quotes = state.storage.latest_quotes_all().await?;

    let mut by_slug: HashMap<String, Vec<PriceQuote>> = HashMap::new();
    for q in quotes {
        by_slug.entry(q.slug.clone()).or_default().push(q);
    }

    let mut views = Vec::with_capacity(catalog.len());
    for item in &catalog {
        let mut item_quotes = by_slug.remove(&item.slug).unwrap_or_default();
        // Source registration order decides price ties.
        item_quotes.sort_by_key(|q| state.registry.position(&q.source).unwrap_or(usize::MAX));

        let premium = item_quotes
            .iter()
            .filter_map(|q| q.attributes.as_ref())
            .map(|a| state.valuation.premium(&item.slug, Some(a)))
            .max()
            .unwrap_or(rust_decimal::Decimal::ONE);

        views.push(aggregate(
            item,
            item_quotes,
            premium,
            state.spread_threshold_pct,
        ));
    }
    Ok(views)
}

/// Cache-aside fetch of the unfiltered view list.
async fn views_cached(state: &AppState) -> Result<Vec<AggregateView>, ServiceError> {
    let key = query_key("views", &[("scope", "all")]);
    if let Some(views) = state.cache.get(&key) {
        return Ok(views);
    }
    let views = build_views(state).await?;
    state.cache.put(key, views.clone());
    Ok(views)
}

/// Cache key for a filtered/sorted list, derived from the query shape.
fn gifts_cache_key(query: &GiftsQuery) -> String {
    let min_spread = query
        .min_spread_pct
        .map(|v| v.to_string())
        .unwrap_or_default();
    query_key(
        "gifts",
        &[
            ("sort_by", query.sort_by.as_deref().unwrap_or("name")),
            ("sort_order", query.sort_order.as_deref().unwrap_or("asc")),
            ("min_spread_pct", &min_spread),
            ("search", query.search.as_deref().unwrap_or("")),
        ],
    )
}

fn apply_query(mut views: Vec<AggregateView>, query: &GiftsQuery) -> Vec<AggregateView> {
    if let Some(search) = &query.search {
        let needle = search.to_lowercase();
        views.retain(|v| v.name.to_lowercase().contains(&needle));
    }
    if let Some(min) = query.min_spread_pct {
        views.retain(|v| v.spread_pct.map_or(false, |p| p >= min));
    }

    let descending = query.sort_order.as_deref() == Some("desc");
    match query.sort_by.as_deref() {
        Some("best_price") => {
            // Unpriced items always sort last.
            views.sort_by(|a, b| {
                let pa = a.best_price.as_ref().map(|p| p.price);
                let pb = b.best_price.as_ref().map(|p| p.price);
                match (pa, pb) {
                    (Some(a), Some(b)) => a.cmp(&b),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                }
            });
        }
        Some("spread_pct") => {
            views.sort_by(|a, b| {
                let pa = a.spread_pct.unwrap_or(f64::NEG_INFINITY);
                let pb = b.spread_pct.unwrap_or(f64::NEG_INFINITY);
                pa.partial_cmp(&pb).unwrap_or(std::cmp::Ordering::Equal)
            });
        }
        _ => views.sort_by(|a, b| a.name.cmp(&b.name)),
    }
    if descending {
        views.reverse();
    }
    views
}

// ---------------------------------------------------------------------------
// Gift handlers
// ---------------------------------------------------------------------------

/// GET /api/gifts
pub async fn list_gifts(
    State(state): State<AppState>,
    Query(query): Query<GiftsQuery>,
) -> Result<Json<GiftsResponse>, ApiError> {
    let key = gifts_cache_key(&query);
    let gifts = match state.cache.get(&key) {
        Some(gifts) => gifts,
        None => {
            let gifts = apply_query(views_cached(&state).await?, &query);
            state.cache.put(key, gifts.clone());
            gifts
        }
    };
    let meta = GiftsMeta {
        total: gifts.len(),
        sources: state.registry.len(),
        refreshed_at: state.cache.last_refresh(),
    };
    Ok(Json(GiftsResponse { gifts, meta }))
}

/// GET /api/gifts/:slug
pub async fn get_gift(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<GiftResponse>, ApiError> {
    let views = views_cached(&state).await?;
    let gift = views
        .into_iter()
        .find(|v| v.slug == slug)
        .ok_or(ServiceError::ItemNotFound(slug))?;
    Ok(Json(GiftResponse {
        gift,
        refreshed_at: state.cache.last_refresh(),
    }))
}

/// GET /api/gifts/:slug/stats
pub async fn get_gift_stats(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<MarketStats>, ApiError> {
    Ok(Json(state.stats.compute(&slug).await?))
}

/// GET /api/stats
pub async fn market_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<Vec<MarketStats>>, ApiError> {
    if let Some(slug) = query.slug {
        return Ok(Json(vec![state.stats.compute(&slug).await?]));
    }
    let catalog = state.storage.list_catalog().await?;
    let mut all = Vec::with_capacity(catalog.len());
    for item in &catalog {
        all.push(state.stats.compute(&item.slug).await?);
    }
    Ok(Json(all))
}

// ---------------------------------------------------------------------------
// Deal handlers
// ---------------------------------------------------------------------------

/// POST /api/deals
pub async fn create_deal(
    State(state): State<AppState>,
    Json(request): Json<CreateDealRequest>,
) -> Result<(StatusCode, Json<Deal>), ApiError> {
    let deal = state
        .escrow
        .create_deal(crate::escrow::DealRequest {
            initiator_id: request.initiator_id,
            offer_slug: request.offer_slug,
            required: request.required,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(deal)))
}

/// GET /api/deals/:id
pub async fn get_deal(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Deal>, ApiError> {
    Ok(Json(state.escrow.get_deal(id).await?))
}

/// POST /api/deals/:id/check-deposit
pub async fn check_deposit(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Deal>, ApiError> {
    Ok(Json(state.escrow.check_deposits(id).await?))
}

/// POST /api/deals/:id/cancel
pub async fn cancel_deal(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Deal>, ApiError> {
    Ok(Json(state.escrow.cancel(id).await?))
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> StatusCode {
    // Degraded sources are fine; an unreachable database is not.
    match state.storage.list_catalog().await {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
