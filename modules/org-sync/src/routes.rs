//! Operational HTTP routes: health, outbox stats, replay

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use event_bus::{BusStats, InMemoryBus};
use outbox::{OutboxError, OutboxProcessor, ProcessorStats, ReplayReport};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

pub const DEFAULT_REPLAY_LIMIT: usize = 100;
pub const MAX_REPLAY_LIMIT: usize = 1000;

#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<OutboxProcessor>,
    pub bus: Arc<InMemoryBus>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn outbox_error(e: OutboxError) -> ApiError {
    tracing::error!(error = %e, "Outbox operation failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "outbox_error".to_string(),
            message: e.to_string(),
        }),
    )
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub outbox: ProcessorStats,
    pub bus: BusStats,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReplayQuery {
    pub limit: Option<usize>,
}

pub fn ops_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/outbox/stats", get(outbox_stats))
        .route(
            "/api/outbox/replay/aggregate/{aggregate_id}",
            post(replay_aggregate),
        )
        .route("/api/outbox/replay/type/{event_type}", post(replay_type))
        .with_state(state)
}

/// GET /api/health - 503 when the processor or bus is not running
async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let processor_ok = state.processor.health().is_ok();
    let bus_ok = state.bus.health().is_ok();
    let healthy = processor_ok && bus_ok;

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "status": if healthy { "healthy" } else { "degraded" },
            "service": "org-sync-rs",
            "version": env!("CARGO_PKG_VERSION"),
            "checks": {
                "outbox_processor": processor_ok,
                "event_bus": bus_ok,
            }
        })),
    )
}

/// GET /api/outbox/stats
async fn outbox_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let outbox = state.processor.stats().await.map_err(outbox_error)?;
    Ok(Json(StatsResponse {
        outbox,
        bus: state.bus.stats(),
    }))
}

/// POST /api/outbox/replay/aggregate/{aggregate_id}
async fn replay_aggregate(
    State(state): State<AppState>,
    Path(aggregate_id): Path<String>,
) -> Result<Json<ReplayReport>, ApiError> {
    tracing::info!(aggregate_id = %aggregate_id, "Replay by aggregate requested");
    state
        .processor
        .replay_by_aggregate(&aggregate_id)
        .await
        .map(Json)
        .map_err(outbox_error)
}

/// POST /api/outbox/replay/type/{event_type}?limit=
async fn replay_type(
    State(state): State<AppState>,
    Path(event_type): Path<String>,
    Query(query): Query<ReplayQuery>,
) -> Result<Json<ReplayReport>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_REPLAY_LIMIT);
    if limit == 0 || limit > MAX_REPLAY_LIMIT {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "invalid_limit".to_string(),
                message: format!("limit must be between 1 and {MAX_REPLAY_LIMIT}"),
            }),
        ));
    }

    tracing::info!(event_type = %event_type, limit, "Replay by type requested");
    state
        .processor
        .replay_by_type(&event_type, limit)
        .await
        .map(Json)
        .map_err(outbox_error)
}
