//! HTTP route definitions

use axum::{extract::State, response::Json, routing::get, Router};
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::app::AppState;
use crate::util::time::uptime_secs;
use crate::ws::ws_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub active_players: usize,
    pub connections: usize,
    pub tick_loop_running: bool,
    pub tick: u64,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health(&state))
}

fn health(state: &AppState) -> HealthResponse {
    HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_players: state.sessions.player_count(),
        connections: state.broadcaster.session_count(),
        tick_loop_running: state.sessions.is_running(),
        tick: state.sessions.current_tick(),
    }
}
