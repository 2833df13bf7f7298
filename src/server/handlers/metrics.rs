use crate::{
    error::{Result, SinkError},
    server::state::AppState,
};
use axum::{
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};

/// Prometheus text exposition
pub async fn serve_metrics(State(state): State<AppState>) -> Result<Response> {
    let handle = state.metrics.as_ref().ok_or(SinkError::MetricsUnavailable)?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
        .into_response())
}
