//! Prometheus metrics for the segment sink.
//!
//! The recorder is installed at most once per process; helpers are cheap
//! no-ops when no recorder is installed (e.g. in unit tests).

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use tracing::warn;

static HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

/// Install the global Prometheus recorder, returning its render handle.
///
/// Returns `None` if another recorder was already installed.
pub fn install() -> Option<PrometheusHandle> {
    HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Metrics recorder unavailable: {}", e);
                None
            }
        })
        .clone()
}

pub fn record_segment_published(duration_secs: f64, entries: usize) {
    counter!("hlsink_segments_published_total").increment(1);
    histogram!("hlsink_segment_duration_seconds").record(duration_secs);
    gauge!("hlsink_playlist_entries").set(entries as f64);
}

pub fn record_boundary_request(source: &'static str) {
    counter!("hlsink_boundary_requests_total", "source" => source).increment(1);
}

pub fn record_encryption_failure() {
    counter!("hlsink_encryption_failures_total").increment(1);
}

pub fn record_manifest_write_failure() {
    counter!("hlsink_manifest_write_failures_total").increment(1);
}
