use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::traits::StorageEngine;

/// In-memory, `BTreeMap`-based storage engine.
///
/// Intended for tests and embedding. Blobs are held behind a `RwLock`, so
/// `put_if_not_exists` is trivially atomic. An engine built with
/// [`InMemoryEngine::without_conditional_put`] refuses conditional creates,
/// which exercises the callers' fallback path.
pub struct InMemoryEngine {
    blobs: RwLock<BTreeMap<String, Vec<u8>>>,
    conditional_put: bool,
}

impl InMemoryEngine {
    /// Create a new empty engine.
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(BTreeMap::new()),
            conditional_put: true,
        }
    }

    /// Create an engine that reports conditional creates as unsupported.
    pub fn without_conditional_put() -> Self {
        Self {
            conditional_put: false,
            ..Self::new()
        }
    }

    /// Number of blobs currently stored.
    pub fn len(&self) -> usize {
        self.blobs.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the engine holds no blobs.
    pub fn is_empty(&self) -> bool {
        self.blobs.read().expect("lock poisoned").is_empty()
    }
}

impl Default for InMemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine for InMemoryEngine {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let map = self.blobs.read().expect("lock poisoned");
        Ok(map.get(key).cloned())
    }

    fn put(&self, key: &str, data: &[u8]) -> StoreResult<()> {
        let mut map = self.blobs.write().expect("lock poisoned");
        map.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn put_if_not_exists(&self, key: &str, data: &[u8]) -> StoreResult<()> {
        if !self.conditional_put {
            return Err(StoreError::Unsupported("put_if_not_exists"));
        }
        let mut map = self.blobs.write().expect("lock poisoned");
        if map.contains_key(key) {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }
        map.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut map = self.blobs.write().expect("lock poisoned");
        Ok(map.remove(key).is_some())
    }

    fn delete_by_prefix(&self, prefix: &str) -> StoreResult<usize> {
        let mut map = self.blobs.write().expect("lock poisoned");
        let before = map.len();
        map.retain(|k, _| !k.starts_with(prefix));
        Ok(before - map.len())
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        let map = self.blobs.read().expect("lock poisoned");
        Ok(map.contains_key(key))
    }

    fn size(&self, key: &str) -> StoreResult<Option<u64>> {
        let map = self.blobs.read().expect("lock poisoned");
        Ok(map.get(key).map(|b| b.len() as u64))
    }

    fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let map = self.blobs.read().expect("lock poisoned");
        Ok(map
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

impl std::fmt::Debug for InMemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryEngine")
            .field("blob_count", &self.len())
            .field("conditional_put", &self.conditional_put)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_and_get() {
        let engine = InMemoryEngine::new();
        engine.put("a/b", b"hello").unwrap();
        assert_eq!(engine.get("a/b").unwrap().unwrap(), b"hello");
        assert!(engine.get("a/c").unwrap().is_none());
    }

    #[test]
    fn put_replaces() {
        let engine = InMemoryEngine::new();
        engine.put("k", b"one").unwrap();
        engine.put("k", b"two").unwrap();
        assert_eq!(engine.get("k").unwrap().unwrap(), b"two");
        assert_eq!(engine.len(), 1);
    }

    #[test]
    fn conditional_put_refuses_existing_key() {
        let engine = InMemoryEngine::new();
        engine.put_if_not_exists("k", b"first").unwrap();
        let err = engine.put_if_not_exists("k", b"second").unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(engine.get("k").unwrap().unwrap(), b"first");
    }

    #[test]
    fn conditional_put_can_be_disabled() {
        let engine = InMemoryEngine::without_conditional_put();
        let err = engine.put_if_not_exists("k", b"x").unwrap_err();
        assert!(matches!(err, StoreError::Unsupported(_)));
        assert!(engine.is_empty());
    }

    #[test]
    fn delete_reports_presence() {
        let engine = InMemoryEngine::new();
        engine.put("k", b"x").unwrap();
        assert!(engine.delete("k").unwrap());
        assert!(!engine.delete("k").unwrap());
        assert!(!engine.exists("k").unwrap());
    }

    #[test]
    fn list_and_delete_by_prefix() {
        let engine = InMemoryEngine::new();
        engine.put("pool/a", b"1").unwrap();
        engine.put("pool/b", b"22").unwrap();
        engine.put("poolx/c", b"3").unwrap();
        engine.put("other", b"4").unwrap();

        assert_eq!(engine.list("pool/").unwrap(), vec!["pool/a", "pool/b"]);
        assert_eq!(engine.size("pool/b").unwrap(), Some(2));
        assert_eq!(engine.delete_by_prefix("pool/").unwrap(), 2);
        assert_eq!(engine.list("").unwrap(), vec!["other", "poolx/c"]);
    }

    #[test]
    fn concurrent_conditional_puts_have_one_winner() {
        use std::sync::Arc;
        use std::thread;

        let engine = Arc::new(InMemoryEngine::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let engine = Arc::clone(&engine);
                thread::spawn(move || engine.put_if_not_exists("race", &[i as u8]).is_ok())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().expect("thread should not panic"))
            .filter(|ok| *ok)
            .count();
        assert_eq!(winners, 1);
    }
}
