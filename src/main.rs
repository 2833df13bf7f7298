use hlsink::{
    config, ingest, server,
    sink::{BoundaryRequest, SegmentController},
};
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    // Setup logging
    tracing_subscriber::fmt::init();

    info!("Starting hlsink - live HLS segment sink");

    let config = match config::Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    info!("Running in {} mode", if config.is_dev { "DEV" } else { "PROD" });

    let controller = match SegmentController::new(config.sink.clone(), |request: BoundaryRequest| {
        info!(
            "Producer should cut {} at {:?}",
            request.location, request.position
        );
    }) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!("Invalid sink settings: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = controller.on_session_start() {
        warn!("Session started in degraded mode: {}", e);
    }

    let output_dir = config.output_dir.clone();
    let ingest_controller = controller.clone();
    let ingest = tokio::spawn(async move {
        let stdin = BufReader::new(tokio::io::stdin());
        ingest::run(stdin, ingest_controller, &output_dir).await
    });

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutdown requested");
    };

    if let Err(e) = server::start(config, controller.clone(), shutdown).await {
        error!("Failed to start server: {}", e);
        controller.on_session_stop();
        std::process::exit(1);
    }

    if ingest.is_finished() {
        match ingest.await {
            Ok(Ok(summary)) => info!("Ingest finished: {:?}", summary),
            Ok(Err(e)) => error!("Ingest failed: {}", e),
            Err(e) => error!("Ingest task panicked: {}", e),
        }
    } else {
        ingest.abort();
    }

    controller.on_session_stop();
}
