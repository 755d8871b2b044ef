//! Error types for the staging pipeline.

use std::path::PathBuf;

/// Result type alias for staging operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while staging an application.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Engine Errors
    // =========================================================================
    /// A container engine API call failed.
    #[error("engine operation '{operation}' failed: {reason}")]
    Engine { operation: String, reason: String },

    /// A path requested from a container does not exist.
    #[error("path not found in container: {path}")]
    NotFoundInContainer { path: String },

    // =========================================================================
    // Archive Errors
    // =========================================================================
    /// An archive could not be read or repacked.
    #[error("malformed archive at {path}: {reason}")]
    MalformedArchive { path: PathBuf, reason: String },

    // =========================================================================
    // Staging Errors
    // =========================================================================
    /// The builder exited with a non-zero status.
    #[error("build failed with exit code {code}")]
    NonZeroExit { code: i64 },

    /// The staging metadata could not be parsed.
    #[error("malformed staging metadata: {0}")]
    MalformedMetadata(String),

    /// The staging metadata carries no `web` process type.
    #[error("staging produced no web start command")]
    StartCommandMissing,

    /// The staging request failed validation.
    #[error("invalid staging request: {0}")]
    InvalidRequest(String),

    // =========================================================================
    // Lifecycle Bundle Errors
    // =========================================================================
    /// The lifecycle bundle could not be downloaded.
    #[error("failed to fetch lifecycle bundle from '{url}': {reason}")]
    LifecycleFetch { url: String, reason: String },

    // =========================================================================
    // Cache Errors
    // =========================================================================
    /// The build artifact cache could not be written.
    #[error("failed to write build cache: {0}")]
    CacheWriteFailed(String),

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // =========================================================================
    // Timeout Errors
    // =========================================================================
    /// Operation timed out.
    #[error("operation timed out after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: std::time::Duration,
    },
}
