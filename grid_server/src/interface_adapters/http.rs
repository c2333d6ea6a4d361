// Plain HTTP endpoints next to the WebSocket route.

use crate::interface_adapters::state::AppState;
use axum::{Json, extract::State};
use std::sync::Arc;

#[derive(Debug, serde::Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    // Registered sessions, read without touching the hub task.
    pub clients: usize,
}

pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        clients: state.hub.peer_count(),
    })
}
