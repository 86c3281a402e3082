//! Health check routes
//!
//! - `GET /health` - liveness, always 200 while the process runs
//! - `GET /health/ready` - readiness, verifies the state store responds

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};

use hearth_statestore::StateStore;

use crate::error::HubResult;

/// Shared state for health handlers
#[derive(Clone)]
pub struct HealthState {
    pub store: Arc<dyn StateStore>,
}

pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/", get(liveness))
        .route("/ready", get(readiness))
        .with_state(state)
}

async fn liveness() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "alive",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn readiness(State(state): State<HealthState>) -> HubResult<impl IntoResponse> {
    state.store.get_state("hearth.health.probe").await?;
    Ok(Json(serde_json::json!({"status": "ready"})))
}
