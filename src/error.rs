use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::path::PathBuf;
use thiserror::Error;
use tracing::error;

/// Errors raised by the segment sink.
///
/// None of these are fatal to a streaming session: the controller reports
/// them and carries on with the next segment.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to read encryption key {path}: {source}")]
    KeyFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid encryption key: expected 16 bytes, read {0}")]
    InvalidKeyLength(usize),

    #[error("Encryption requested but no key is loaded")]
    KeyNotLoaded,

    #[error("Cipher error: {0}")]
    Cipher(String),

    #[error("Segment I/O failed for {path}: {source}")]
    SegmentIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write playlist {path}: {source}")]
    ManifestWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Playlist already ended, entry rejected")]
    EndOfStream,

    #[error("Invalid segment record: {0}")]
    InvalidSegmentRecord(String),

    #[error("Metrics recorder not installed")]
    MetricsUnavailable,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SinkError>;

impl IntoResponse for SinkError {
    fn into_response(self) -> Response {
        let status = match &self {
            SinkError::InvalidConfig(_) | SinkError::InvalidSegmentRecord(_) => {
                StatusCode::BAD_REQUEST
            }
            SinkError::MetricsUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        error!("Request failed: {}", self);

        (status, self.to_string()).into_response()
    }
}
