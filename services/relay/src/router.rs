//! Axum Router Configuration

use crate::{state::AppState, ws::ws_handler};
use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize, Debug, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: &'static str,
    pub active_sessions: usize,
}

/// Reports liveness and the number of registered sessions.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        active_sessions: state.registry.len(),
    })
}

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws/{client_id}", get(ws_handler))
        .with_state(app_state)
}
