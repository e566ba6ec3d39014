use lake_types::Id;

/// Errors from reading or writing data objects.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("data object not found: {0}")]
    NotFound(Id),

    /// The stored rows of an object cannot be parsed.
    #[error("corrupt data object {id}: {reason}")]
    Corrupt { id: Id, reason: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage error: {0}")]
    Store(#[from] lake_storage::StoreError),
}

pub type Result<T> = std::result::Result<T, DataError>;
