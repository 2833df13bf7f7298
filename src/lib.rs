pub mod config;
pub mod crypto;
pub mod error;
pub mod hls;
pub mod ingest;
pub mod metrics;
pub mod server;
pub mod sink;
