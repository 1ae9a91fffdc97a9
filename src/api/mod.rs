//! HTTP API — Axum server for reads and deal operations.
//!
//! Read endpoints serve cached aggregate views with a staleness
//! indicator; write endpoints drive the escrow state machine.
//! CORS enabled for local development.

pub mod routes;

use anyhow::Result;
use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::cache::TtlCache;
use crate::engine::stats::MarketStatsService;
use crate::engine::valuation::ValuationEngine;
use crate::error::ServiceError;
use crate::escrow::EscrowService;
use crate::markets::registry::SourceRegistry;
use crate::storage::Storage;
use crate::types::AggregateView;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct ApiState {
    pub storage: Arc<Storage>,
    pub registry: Arc<SourceRegistry>,
    pub valuation: Arc<ValuationEngine>,
    pub stats: Arc<MarketStatsService>,
    pub escrow: Arc<EscrowService>,
    pub cache: Arc<TtlCache<Vec<AggregateView>>>,
    pub spread_threshold_pct: f64,
}

pub type AppState = Arc<ApiState>;

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

pub struct ApiError(ServiceError);

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        Self(e)
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        Self(ServiceError::Persistence(e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ServiceError::DealNotFound(_) | ServiceError::ItemNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            ServiceError::DuplicateMemoCode(_) | ServiceError::InvalidTransition { .. } => {
                StatusCode::CONFLICT
            }
            ServiceError::InvalidDealSpec(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::Persistence(_) => {
                error!(error = %self.0, "Persistence failure in request path");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ServiceError::Ledger(_) => StatusCode::BAD_GATEWAY,
        };
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// Start the API server as a background task; does not block.
pub fn spawn_api(state: AppState, port: u16) -> Result<()> {
    let app = build_router(state);

    tokio::spawn(async move {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
        info!(port, "API server starting on http://localhost:{port}");

        match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => {
                if let Err(e) = axum::serve(listener, app).await {
                    error!(error = %e, "API server error");
                }
            }
            Err(e) => error!(error = %e, port, "Failed to bind API port"),
        }
    });

    Ok(())
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin("*".parse::<HeaderValue>().unwrap_or(HeaderValue::from_static("*")))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/gifts", get(routes::list_gifts))
        .route("/api/gifts/:slug", get(routes::get_gift))
        .route("/api/gifts/:slug/stats", get(routes::get_gift_stats))
        .route("/api/stats", get(routes::market_stats))
        .route("/api/deals", post(routes::create_deal))
        .route("/api/deals/:id", get(routes::get_deal))
        .route("/api/deals/:id/check-deposit", post(routes::check_deposit))
        .route("/api/deals/:id/cancel", post(routes::cancel_deal))
        .route("/health", get(routes::health))
        .layer(cors)
        .with_state(state)
}
