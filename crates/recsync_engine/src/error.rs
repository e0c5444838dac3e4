//! Error types for the sync engine.

use recsync_model::ModelError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Local store error.
    #[error("store error on {table}: {message}")]
    Store {
        /// Table involved.
        table: String,
        /// Error message.
        message: String,
    },

    /// Sync options or target could not be built.
    #[error("invalid sync options: {0}")]
    InvalidOptions(String),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error from a persistent collaborator.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Another process holds the cursor directory lock.
    #[error("cursor store is locked by another process")]
    CursorLocked,

    /// An entity name has no descriptor.
    #[error("unknown entity type: {0}")]
    UnknownEntity(String),

    /// The same entity was registered twice on one orchestrator.
    #[error("entity type {0} already registered")]
    DuplicateRegistration(String),

    /// The transport dropped its status channel before a terminal status.
    #[error("status stream for {table} closed before completion")]
    StatusStreamClosed {
        /// Table being synced.
        table: String,
    },

    /// No tokio runtime was available to dispatch a pass.
    #[error("no async runtime available: {0}")]
    NoRuntime(String),

    /// Descriptor error.
    #[error("model error: {0}")]
    Model(#[from] ModelError),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a store error.
    pub fn store(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Store {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Returns true if a later pass may succeed where this one failed.
    ///
    /// Nothing is retried within a pass; this only informs callers.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::StatusStreamClosed { .. } => true,
            SyncError::CursorLocked => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection lost").is_retryable());
        assert!(!SyncError::transport_fatal("invalid session").is_retryable());
        assert!(SyncError::CursorLocked.is_retryable());
        assert!(!SyncError::UnknownEntity("Lead".into()).is_retryable());
        assert!(!SyncError::InvalidOptions("empty field list".into()).is_retryable());
    }

    #[test]
    fn error_display() {
        let err = SyncError::store("Account", "no such table");
        assert_eq!(err.to_string(), "store error on Account: no such table");

        let err = SyncError::StatusStreamClosed {
            table: "Contact".into(),
        };
        assert!(err.to_string().contains("Contact"));
    }
}
