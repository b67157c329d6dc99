use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::sessions::SessionStore;

#[derive(Clone)]
pub struct HealthState {
    sessions: Arc<SessionStore>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub active_sessions: usize,
    pub checked_at: String,
}

pub fn router(sessions: Arc<SessionStore>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { sessions })
}

pub async fn health(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ready",
        service: "parlor-server",
        active_sessions: state.sessions.len(),
        checked_at: Utc::now().to_rfc3339(),
    })
}
