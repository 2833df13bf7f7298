use crate::server::state::AppState;
use axum::{Json, extract::State};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    media_sequence: u64,
    entries: usize,
    end_of_stream: bool,
    uptime_seconds: u64,
}

/// Liveness plus a snapshot of the playlist being produced
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let published = state.controller.published();

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        media_sequence: published.media_sequence,
        entries: published.entries,
        end_of_stream: published.end_of_stream,
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}
