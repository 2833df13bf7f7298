use crate::server::state::AppState;
use axum::{
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::debug;

/// Serve the manifest as last published by the controller.
///
/// Reads the published snapshot, so a segment being encrypted delays what
/// clients see but never the request itself.
pub async fn serve_playlist(State(state): State<AppState>) -> Response {
    let manifest = String::from(&*state.controller.published().manifest);
    debug!("Serving playlist ({} bytes)", manifest.len());

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/vnd.apple.mpegurl"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        manifest,
    )
        .into_response()
}
