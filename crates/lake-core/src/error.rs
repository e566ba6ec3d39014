//! Error types for lake operations.

use lake_commits::CommitError;
use lake_data::DataError;
use lake_journal::JournalError;
use lake_storage::StoreError;
use thiserror::Error;

/// Errors that can occur during pool, branch and root operations.
#[derive(Debug, Error)]
pub enum LakeError {
    #[error("pool not found: {0}")]
    PoolNotFound(String),

    #[error("pool already exists: {0}")]
    PoolExists(String),

    #[error("branch not found: {pool}/{branch}")]
    BranchNotFound { pool: String, branch: String },

    #[error("branch already exists: {pool}/{branch}")]
    BranchExists { pool: String, branch: String },

    #[error("invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    /// The transaction would not change anything.
    #[error("empty transaction")]
    EmptyTransaction,

    /// The branch kept moving under every attempt.
    #[error("commit failed after {attempts} attempts")]
    CommitFailed { attempts: u32 },

    /// The version marker belongs to something else.
    #[error("bad lake marker: {0}")]
    BadMagic(String),

    #[error("lake version mismatch: found {found}, expected {expected}")]
    VersionMismatch { found: u32, expected: u32 },

    #[error("no lake found at this location")]
    NotALake,

    #[error("a lake already exists at this location")]
    LakeExists,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Commit(#[from] CommitError),

    #[error("journal error: {0}")]
    Journal(#[from] JournalError),

    #[error("data error: {0}")]
    Data(#[from] DataError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl LakeError {
    /// Returns `true` for a merge whose sides changed the same objects
    /// incompatibly.
    pub fn is_conflict(&self) -> bool {
        matches!(self, LakeError::Commit(CommitError::Conflict(_)))
    }
}

/// Convenience type alias for lake operations.
pub type Result<T> = std::result::Result<T, LakeError>;
