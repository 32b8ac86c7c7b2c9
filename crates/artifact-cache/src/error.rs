//! Error types for the artifact cache.
//!
//! Load and save never return these to callers; every failure there is
//! logged and degraded to a miss. They surface only from setup paths
//! (namespace validation, config loading) and operator commands.

use std::path::PathBuf;
use thiserror::Error;

use crate::store::StoreError;

/// Main error type for the artifact cache.
#[derive(Debug, Error)]
pub enum CacheError {
    // Database errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: StoreError,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Invalid namespace {name:?}: {reason}")]
    InvalidNamespace { name: String, reason: String },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

impl From<StoreError> for CacheError {
    fn from(err: StoreError) -> Self {
        CacheError::Database {
            message: err.to_string(),
            source: err,
        }
    }
}

impl CacheError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        CacheError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }
}
