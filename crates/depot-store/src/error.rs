//! Error types for depot-store operations.
//!
//! Variants identify the failing collaborator so callers can distinguish a
//! backend fault from a ref-database fault or a writer fault without
//! parsing messages.

use thiserror::Error;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during pack-store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The object database or its backend failed.
    #[error("object database error: {message}")]
    ObjectDatabase {
        /// Description of the failure.
        message: String,
    },

    /// The ref database failed.
    #[error("ref database error: {message}")]
    RefDatabase {
        /// Description of the failure.
        message: String,
    },

    /// The pack writer failed.
    #[error("pack writer error: {message}")]
    PackWriter {
        /// Description of the failure.
        message: String,
    },

    /// Serialization/deserialization failed.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// A configuration precondition was violated.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the violated precondition.
        message: String,
    },

    /// The operation was cancelled through its progress monitor.
    #[error("operation cancelled")]
    Cancelled,
}

impl StoreError {
    /// Creates an object-database error with the given message.
    #[must_use]
    pub fn odb(message: impl Into<String>) -> Self {
        Self::ObjectDatabase {
            message: message.into(),
        }
    }

    /// Creates a ref-database error with the given message.
    #[must_use]
    pub fn refdb(message: impl Into<String>) -> Self {
        Self::RefDatabase {
            message: message.into(),
        }
    }

    /// Creates a pack-writer error with the given message.
    #[must_use]
    pub fn writer(message: impl Into<String>) -> Self {
        Self::PackWriter {
            message: message.into(),
        }
    }
}

impl From<depot_core::Error> for StoreError {
    fn from(e: depot_core::Error) -> Self {
        Self::ObjectDatabase {
            message: e.to_string(),
        }
    }
}
