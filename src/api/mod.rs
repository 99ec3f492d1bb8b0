//! HTTP API for swap intake, payment webhooks, health checks, and monitoring

use crate::config::ApiConfig;
use crate::engine::SwapEngine;
use crate::error::{StoreError, SwapError, SwapResult};
use crate::payment::PaymentProof;
use crate::price::PriceQuote;
use crate::store::StoreStats;
use crate::swap::{SwapRecord, SwapRequest};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SwapEngine>,
}

/// Routes served by the API
pub fn router(engine: Arc<SwapEngine>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/swaps", post(create_swap))
        .route("/swaps/:id", get(get_swap))
        .route("/swaps/:id/payment", post(notify_payment))
        .route("/stats", get(get_stats))
        .route("/metrics", get(crate::metrics::metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { engine })
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, engine: Arc<SwapEngine>) -> SwapResult<()> {
    let app = router(engine);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| SwapError::Config(format!("Cannot bind API address {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| SwapError::TransientInfra {
            operation: "api_server".to_string(),
            message: e.to_string(),
        })?;

    Ok(())
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - recovery finished and store reachable
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let recovered = state.engine.is_ready();
    let store_ok = match state.engine.store().health_check().await {
        Ok(()) => true,
        Err(e) => {
            warn!("Store health check failed: {}", e);
            false
        }
    };

    let response = ReadinessResponse {
        ready: recovered && store_ok,
        recovered,
        store: store_ok,
        active_drivers: state.engine.active_drivers(),
    };

    let status = if response.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}

/// Validate a quote, persist the swap and start driving it
async fn create_swap(
    State(state): State<AppState>,
    Json(body): Json<CreateSwapBody>,
) -> Result<(StatusCode, Json<SwapRecord>), (StatusCode, Json<ErrorResponse>)> {
    let record = state
        .engine
        .create_and_drive(body.request, &body.quotes)
        .await
        .map_err(swap_error_response)?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// Get a single swap record
async fn get_swap(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SwapRecord>, (StatusCode, Json<ErrorResponse>)> {
    state
        .engine
        .get_swap(&id)
        .await
        .map(Json)
        .map_err(swap_error_response)
}

/// Payment webhook: push a settlement proof for a swap
async fn notify_payment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(proof): Json<PaymentProof>,
) -> Result<Json<SwapRecord>, (StatusCode, Json<ErrorResponse>)> {
    state
        .engine
        .notify_payment(&id, proof)
        .await
        .map(Json)
        .map_err(swap_error_response)
}

/// Swap counts per state
async fn get_stats(
    State(state): State<AppState>,
) -> Result<Json<StatsResponse>, (StatusCode, Json<ErrorResponse>)> {
    match state.engine.store().stats().await {
        Ok(stats) => Ok(Json(StatsResponse {
            total: stats.total(),
            active_drivers: state.engine.active_drivers(),
            stats,
        })),
        Err(e) => {
            warn!("Failed to collect swap stats: {}", e);
            Err(error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

fn error_response(status: StatusCode, error: String) -> (StatusCode, Json<ErrorResponse>) {
    (status, Json(ErrorResponse { error }))
}

fn swap_error_response(e: SwapError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &e {
        SwapError::Validation(_) | SwapError::Store(StoreError::InvalidId(_)) => {
            StatusCode::BAD_REQUEST
        }
        SwapError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
        SwapError::Store(StoreError::DuplicateId(_))
        | SwapError::WrongState { .. }
        | SwapError::ExpiryRace { .. } => StatusCode::CONFLICT,
        SwapError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
        e if e.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
        e => {
            warn!("Swap request failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error_response(status, e.to_string())
}

// Request types

#[derive(Deserialize)]
struct CreateSwapBody {
    request: SwapRequest,
    quotes: Vec<PriceQuote>,
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    recovered: bool,
    store: bool,
    active_drivers: usize,
}

#[derive(Serialize)]
struct StatsResponse {
    total: usize,
    active_drivers: usize,
    #[serde(flatten)]
    stats: StoreStats,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}
