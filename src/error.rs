//! Error types for recordgate
//!
//! Two layers:
//! - [`BackendError`] is what collaborators (persistence / coordination
//!   backends) hand back through [`BackendResult`].
//! - [`ModelError`] is what public `Model` operations raise. Each call site
//!   decides which variant a backend failure maps to, so there is no blanket
//!   `From<BackendError>` conversion.

use thiserror::Error;

/// Result type alias using ModelError
pub type Result<T> = std::result::Result<T, ModelError>;

/// Result type returned by backend collaborators
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Unified error type for model operations
#[derive(Debug, Error)]
pub enum ModelError {
    // -------------------------------------------------------------------------
    // Input Errors
    // -------------------------------------------------------------------------
    #[error("Validation error: {0}")]
    Validation(String),

    // -------------------------------------------------------------------------
    // Coordination Errors
    // -------------------------------------------------------------------------
    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Row id allocation failed: {0}")]
    Allocation(String),

    #[error("Coordination backend error: {0}")]
    Coordination(String),

    #[error("Operation cancelled")]
    Cancelled,

    // -------------------------------------------------------------------------
    // Persistence Errors
    // -------------------------------------------------------------------------
    #[error("Persistence error: {0}")]
    Persistence(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Failure reported by a backend collaborator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The backend could not be reached at all
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The backend was reached but refused the request
    #[error("backend rejected request: {0}")]
    Rejected(String),
}

impl BackendError {
    /// Whether this failure means the backend is unreachable
    pub fn is_unavailable(&self) -> bool {
        matches!(self, BackendError::Unavailable(_))
    }
}

impl From<bincode::Error> for ModelError {
    fn from(err: bincode::Error) -> Self {
        ModelError::Serialization(err.to_string())
    }
}
