//! Minimal JSON control API: status, run-once, topic cancellation,
//! config reload. Metrics are merged in by the binary.

use std::sync::Arc;

use shuttle_axum::axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::config::ConfigHandle;
use crate::orchestrate::status::{CycleSummary, StatusSnapshot};
use crate::orchestrate::OrchestratorHandle;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: OrchestratorHandle,
    pub config: Arc<ConfigHandle>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/status", get(status))
        .route("/run-once", post(run_once))
        .route("/topics/{topic}/cancel", post(cancel_topic))
        .route("/admin/reload-config", post(reload_config))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error(code: StatusCode, msg: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
    (code, Json(ErrorBody { error: msg.into() }))
}

async fn status(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json(state.orchestrator.status())
}

async fn run_once(
    State(state): State<AppState>,
) -> Result<Json<CycleSummary>, (StatusCode, Json<ErrorBody>)> {
    state
        .orchestrator
        .run_once()
        .await
        .map(Json)
        .map_err(|e| error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()))
}

#[derive(Serialize)]
struct CancelResp {
    topic: String,
    cancelled: bool,
}

async fn cancel_topic(
    State(state): State<AppState>,
    Path(topic): Path<String>,
) -> impl IntoResponse {
    let cfg = state.config.current();
    let name = topic.trim().to_lowercase();
    if cfg.topic(&name).is_none() {
        return error(StatusCode::NOT_FOUND, format!("unknown topic `{name}`")).into_response();
    }
    let cancelled = state.orchestrator.cancel_topic(&name);
    (
        StatusCode::ACCEPTED,
        Json(CancelResp {
            topic: name,
            cancelled,
        }),
    )
        .into_response()
}

#[derive(Serialize)]
struct ReloadResp {
    topics: usize,
    budget: f64,
}

async fn reload_config(State(state): State<AppState>) -> impl IntoResponse {
    match state.config.reload_now() {
        Ok(cfg) => Json(ReloadResp {
            topics: cfg.topics.len(),
            budget: cfg.allocator.budget,
        })
        .into_response(),
        Err(e) => {
            warn!(target: "orchestrator", error = %e, "manual config reload failed");
            error(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()).into_response()
        }
    }
}
