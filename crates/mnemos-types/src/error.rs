//! Shared error types for the Mnemos storage layer.

use thiserror::Error;

/// Top-level error type for every storage operation.
///
/// The variants follow the storage error taxonomy: `Validation` is raised
/// before any I/O, `Conflict` is converted into boolean / optional results by
/// the public store operations, `Transient` is only surfaced after the
/// connection manager exhausted its retries, and `Migration` / `Unsupported`
/// abort initialization.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Malformed input rejected before touching the backend.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A unique or foreign-key constraint rejected the write.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The requested record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Connection reset, pool exhaustion or a busy embedded engine.
    #[error("Transient backend failure: {0}")]
    Transient(String),

    /// The operation exceeded its deadline.
    #[error("Operation timed out after {0} ms")]
    Timeout(u64),

    /// The selected backend cannot express the requested schema feature.
    #[error("Unsupported on {backend} backend: {feature}")]
    Unsupported {
        /// Backend kind that rejected the feature.
        backend: String,
        /// The feature that was requested.
        feature: String,
    },

    /// Schema registration or migration failed; startup must abort.
    #[error("Migration error: {0}")]
    Migration(String),

    /// Any other backend error.
    #[error("Database error: {0}")]
    Database(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid or unreadable configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether the connection manager may retry the failed operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }

    /// Whether the failure is a constraint violation.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    /// Whether the failure must abort initialization.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StoreError::Migration(_) | StoreError::Unsupported { .. }
        )
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Alias for Result with StoreError.
pub type StoreResult<T> = Result<T, StoreError>;
