//! Error types for trace-core operations.
//!
//! Store, lock and registry APIs return [`Result`]. Only the public surface of
//! [`crate::tracer::Tracer`] swallows these errors; everything below it propagates.

use std::path::PathBuf;
use std::time::Duration;

/// All errors that can occur in trace-core operations.
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Invalid session id: {0:?}")]
    InvalidSessionId(String),

    // ─────────────────────────────────────────────────────────────────────
    // Locking Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Timed out after {waited:?} waiting for lock {name:?}")]
    LockTimeout { name: String, waited: Duration },

    // ─────────────────────────────────────────────────────────────────────
    // Backend Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {path}: {source}")]
    Io {
        context: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl TraceError {
    pub(crate) fn io(context: &str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TraceError::Io {
            context: context.to_string(),
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(context: &str, source: serde_json::Error) -> Self {
        TraceError::Json {
            context: context.to_string(),
            source,
        }
    }
}

/// Convenience type alias for Results using TraceError.
pub type Result<T> = std::result::Result<T, TraceError>;
