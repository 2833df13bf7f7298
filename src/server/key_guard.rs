//! Keeps the encryption key out of the static file tree.
//!
//! Segments and the manifest are served straight from the output directory,
//! which may also hold the key file. Key delivery is left to whatever the
//! key URI points at, so requests for the key file are answered with 404.
//!
//! The request path is percent-decoded the same way the file service decodes
//! it, then checked by name and by the file it resolves to.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use percent_encoding::percent_decode_str;
use std::path::{Path, PathBuf};
use tracing::warn;

use super::state::AppState;

/// Path components of a request, percent-decoded.
///
/// `None` when the path does not decode to UTF-8.
fn decoded_components(uri_path: &str) -> Option<Vec<String>> {
    let decoded = percent_decode_str(uri_path).decode_utf8().ok()?;

    Some(
        decoded
            .split(['/', '\\'])
            .filter(|part| !part.is_empty() && *part != ".")
            .map(str::to_string)
            .collect(),
    )
}

/// True when the last decoded component names the key file.
fn names_key(components: &[String], key_location: &Path) -> bool {
    let Some(key_name) = key_location.file_name().and_then(|n| n.to_str()) else {
        return false;
    };

    components
        .last()
        .is_some_and(|last| last.eq_ignore_ascii_case(key_name))
}

/// The file under `output_dir` a request would be served from.
fn served_path(output_dir: &Path, components: &[String]) -> PathBuf {
    components
        .iter()
        .fold(output_dir.to_path_buf(), |path, part| path.join(part))
}

/// True when the request resolves to the key file, whatever it is called.
async fn resolves_to_key(candidate: &Path, key_location: &Path) -> bool {
    let (Ok(candidate), Ok(key)) = (
        tokio::fs::canonicalize(candidate).await,
        tokio::fs::canonicalize(key_location).await,
    ) else {
        return false;
    };

    candidate == key
}

/// Axum middleware: hide the key file from HTTP clients.
pub async fn key_guard_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let key_location = &state.config.sink.key_location;

    let refused = match decoded_components(req.uri().path()) {
        None => true,
        Some(components) => {
            names_key(&components, key_location)
                || resolves_to_key(
                    &served_path(&state.config.output_dir, &components),
                    key_location,
                )
                .await
        }
    };

    if refused {
        warn!("Refused request for encryption key: {}", req.uri().path());
        return (StatusCode::NOT_FOUND, "Not found\n").into_response();
    }

    next.run(req).await
}
