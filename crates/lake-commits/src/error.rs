//! Error types for commit history operations.

use lake_types::Id;

/// Errors that can occur while building, storing or replaying commits.
#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    /// The data object is not present.
    #[error("data object not found: {0}")]
    NotFound(Id),

    /// A data object with this ID is already present.
    #[error("data object already exists: {0}")]
    Exists(Id),

    /// The data object has no vector representation.
    #[error("vector not found for data object: {0}")]
    VectorNotFound(Id),

    /// The data object already has a vector representation.
    #[error("vector already exists for data object: {0}")]
    VectorExists(Id),

    /// No commit object is stored under this ID.
    #[error("commit not found: {0}")]
    CommitNotFound(Id),

    /// The stored commit object cannot be decoded.
    #[error("bad commit object {id}: {reason}")]
    BadCommitObject { id: Id, reason: String },

    /// The stored snapshot checkpoint cannot be decoded.
    #[error("bad snapshot checkpoint {id}: {reason}")]
    BadCheckpoint { id: Id, reason: String },

    /// A revert found nothing left to undo.
    #[error("revert commit is empty")]
    EmptyRevert,

    /// Two patches describe the same changes.
    #[error("difference is empty")]
    EmptyDiff,

    /// The two sides of a merge changed the same object incompatibly.
    #[error("merge conflict: {0}")]
    Conflict(String),

    /// An invariant of the commit history does not hold.
    #[error("internal error: {0}")]
    Internal(String),

    /// The operation was canceled by the caller.
    #[error("operation canceled")]
    Canceled,

    /// Serialization failure when encoding.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Storage engine failure.
    #[error("storage error: {0}")]
    Store(#[from] lake_storage::StoreError),
}

/// Convenience alias for commit results.
pub type Result<T> = std::result::Result<T, CommitError>;
