pub mod handlers;
pub mod key_guard;
pub mod state;

use crate::config::Config;
use crate::sink::SegmentController;
use axum::{
    Router,
    http::{HeaderName, HeaderValue},
    middleware,
    response::Response,
    routing::get,
};
use state::AppState;
use std::future::Future;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, services::ServeDir};
use tracing::{error, info};

async fn add_version_header(mut response: Response) -> Response {
    response.headers_mut().insert(
        HeaderName::from_static("x-hlsink-version"),
        HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
    );
    response
}

/// Build the router: live manifest, health, metrics, and the output
/// directory as a static file tree for segments.
pub fn build_router(state: AppState) -> Router {
    let output = ServeDir::new(&state.config.output_dir);

    Router::new()
        .route("/", get(handlers::health::health_check))
        .route("/health", get(handlers::health::health_check))
        .route("/playlist.m3u8", get(handlers::playlist::serve_playlist))
        .route("/metrics", get(handlers::metrics::serve_metrics))
        .fallback_service(output)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            key_guard::key_guard_middleware,
        ))
        .layer(middleware::map_response(add_version_header))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the Axum HTTP server, serving until `shutdown` resolves
pub async fn start(
    config: Config,
    controller: Arc<SegmentController>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("0.0.0.0:{}", config.port);

    let app = build_router(AppState::new(config, controller));

    let listener = match tokio::net::TcpListener::bind(addr.as_str()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to address {}: {}", addr, e);
            return Err(e.into());
        }
    };

    info!("Server listening on http://{}", addr);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    Ok(())
}
