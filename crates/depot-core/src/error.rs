//! Error types and result aliases for Depot.
//!
//! This module defines the shared error types used across all Depot
//! components. Variants are structured so callers can tell which
//! collaborator failed without parsing messages.

use std::fmt;

/// The result type used throughout Depot.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Depot operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A path or object was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A precondition for the operation was not met.
    #[error("precondition failed: {message}")]
    PreconditionFailed {
        /// Description of the failed precondition.
        message: String,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// An internal error occurred that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a new storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source cause.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new precondition failure with a formatted message.
    #[must_use]
    pub fn precondition(message: impl fmt::Display) -> Self {
        Self::PreconditionFailed {
            message: message.to_string(),
        }
    }
}
