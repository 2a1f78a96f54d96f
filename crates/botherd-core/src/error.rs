//! Error types for the botherd supervisor.
//!
//! Per-bot operation failures are logged and absorbed at the call site
//! (a failing bot never aborts a batch operation or the reconciliation
//! tick); these types carry the cause for the paths that do propagate.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the botherd library.
#[derive(Debug, Error)]
pub enum BotherdError {
    // Launch errors
    #[error("Executable not found: {0}")]
    ExecutableNotFound(PathBuf),

    #[error("Failed to rename {from} to {to}: {reason}")]
    RenameConflict {
        from: PathBuf,
        to: PathBuf,
        reason: String,
    },

    #[error("Failed to spawn {bot}: {message}")]
    Spawn { bot: String, message: String },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for botherd operations.
pub type Result<T> = std::result::Result<T, BotherdError>;

impl From<std::io::Error> for BotherdError {
    fn from(err: std::io::Error) -> Self {
        BotherdError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for BotherdError {
    fn from(err: serde_json::Error) -> Self {
        BotherdError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl BotherdError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        BotherdError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }
}
