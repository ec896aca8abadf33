//! Error types for persistence and trigger operations.

use thiserror::Error;

/// Errors raised by a [`crate::store::DocumentStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend rejected or failed the operation.
    #[error("storage error: {message}")]
    Backend { message: String },

    /// A document could not be encoded or decoded.
    #[error("serialization error: {message}")]
    Serialization { message: String },

    /// The store is missing configuration it needs to operate.
    #[error("store not configured: {message}")]
    NotConfigured { message: String },
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Backend {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

/// Rejections for a manually invoked run.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TriggerError {
    #[error("missing authorization")]
    MissingAuthorization,

    #[error("invalid authorization")]
    InvalidAuthorization,

    #[error("manual trigger secret is not configured")]
    SecretNotConfigured,
}
