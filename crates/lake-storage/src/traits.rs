use crate::error::{StoreError, StoreResult};

/// Blob storage engine.
///
/// All implementations must satisfy these invariants:
/// - `put` replaces any existing blob at the key atomically: readers see
///   either the old or the new contents, never a mix.
/// - `put_if_not_exists` either creates the key or fails with
///   [`StoreError::AlreadyExists`]; two racing callers never both succeed.
/// - The engine never interprets blob contents.
/// - All I/O errors are propagated, never silently ignored.
pub trait StorageEngine: Send + Sync {
    /// Read the blob at `key`.
    ///
    /// Returns `Ok(None)` if the key does not exist.
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Write (create or replace) the blob at `key`.
    fn put(&self, key: &str, data: &[u8]) -> StoreResult<()>;

    /// Create the blob at `key` only if no blob exists there.
    ///
    /// The default implementation reports [`StoreError::Unsupported`].
    fn put_if_not_exists(&self, _key: &str, _data: &[u8]) -> StoreResult<()> {
        Err(StoreError::Unsupported("put_if_not_exists"))
    }

    /// Delete the blob at `key`. Returns `true` if it existed.
    fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Delete every blob whose key starts with `prefix`. Returns the count.
    fn delete_by_prefix(&self, prefix: &str) -> StoreResult<usize> {
        let keys = self.list(prefix)?;
        let mut deleted = 0;
        for key in keys {
            if self.delete(&key)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Check whether a blob exists at `key`.
    fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Size in bytes of the blob at `key`, or `None` if absent.
    fn size(&self, key: &str) -> StoreResult<Option<u64>>;

    /// All keys starting with `prefix`, sorted.
    fn list(&self, prefix: &str) -> StoreResult<Vec<String>>;
}

/// Join key segments with `/`.
pub fn join_key(segments: &[&str]) -> String {
    segments
        .iter()
        .map(|s| s.trim_matches('/'))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}
