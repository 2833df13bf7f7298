use crate::{config::Config, sink::SegmentController};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Instant;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Controller owning the live playlist
    pub controller: Arc<SegmentController>,
    /// Process start, for uptime reporting
    pub started_at: Instant,
    /// Prometheus render handle, if a recorder could be installed
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(config: Config, controller: Arc<SegmentController>) -> Self {
        Self {
            config: Arc::new(config),
            controller,
            started_at: Instant::now(),
            metrics: crate::metrics::install(),
        }
    }
}
