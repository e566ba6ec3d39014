//! Error types for journal operations.

use thiserror::Error;

/// Errors that can occur during journal operations.
#[derive(Debug, Error)]
pub enum JournalError {
    /// An insert found the key already present.
    #[error("key already exists: {0}")]
    KeyExists(String),

    /// The key is not present in the journal table.
    #[error("key not found: {0}")]
    NotFound(String),

    /// The caller's constraint rejected the current entry.
    #[error("constraint failed for key: {0}")]
    Constraint(String),

    /// Appends kept losing position races.
    #[error("journal append retries exceeded after {attempts} attempts")]
    RetriesExceeded { attempts: usize },

    /// A journal entry exists but cannot be decoded.
    #[error("corrupt journal entry at position {position}: {reason}")]
    Corrupt { position: u64, reason: String },

    /// Serialization failure when encoding an entry.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Storage engine failure.
    #[error("storage error: {0}")]
    Store(#[from] lake_storage::StoreError),
}

/// Convenience type alias for journal operations.
pub type Result<T> = std::result::Result<T, JournalError>;
