//! Keyed table replayed from a journal.
//!
//! Every mutation is a journal entry appended at `head + 1`. Because the
//! constraint is evaluated against the table as of `head`, and the append
//! only succeeds if nobody else appended past `head`, a successful update is
//! a compare-and-swap on the stored value.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use lake_storage::StorageEngine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{JournalError, Result};
use crate::queue::{Append, Queue};

/// A value stored in a journal table under its own key.
pub trait Keyed {
    fn key(&self) -> String;
}

/// One serialized journal entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Entry<T> {
    Add(T),
    Update(T),
    Delete(String),
}

/// Reload and retry behavior of a [`Store`].
#[derive(Clone, Debug)]
pub struct JournalConfig {
    /// How long a loaded table is trusted before reads reload it.
    pub ttl: Duration,
    /// Appends attempted before giving up on position races.
    pub max_retries: usize,
    /// Fixed pause between append attempts.
    pub retry_delay: Duration,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(1),
            max_retries: 10,
            retry_delay: Duration::from_millis(10),
        }
    }
}

struct Table<T> {
    entries: BTreeMap<String, T>,
    position: u64,
    loaded_at: Option<Instant>,
    stale: bool,
}

impl<T> Table<T> {
    fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            position: 0,
            loaded_at: None,
            stale: true,
        }
    }

    fn apply(&mut self, entry: Entry<T>)
    where
        T: Keyed,
    {
        match entry {
            Entry::Add(value) | Entry::Update(value) => {
                self.entries.insert(value.key(), value);
            }
            Entry::Delete(key) => {
                self.entries.remove(&key);
            }
        }
    }
}

/// A journal-backed table of `T` keyed by [`Keyed::key`].
pub struct Store<T> {
    queue: Queue,
    config: JournalConfig,
    table: Mutex<Table<T>>,
}

impl<T> Store<T>
where
    T: Keyed + Clone + Serialize + DeserializeOwned,
{
    pub fn new(engine: Arc<dyn StorageEngine>, prefix: impl Into<String>, config: JournalConfig) -> Self {
        Self {
            queue: Queue::new(engine, prefix),
            config,
            table: Mutex::new(Table::new()),
        }
    }

    /// Lock the table, first catching up with the journal if the cached copy
    /// is stale, older than the TTL, or `force` is set.
    fn refresh(&self, force: bool) -> Result<MutexGuard<'_, Table<T>>> {
        let mut table = self.table.lock().expect("journal table lock poisoned");
        let expired = table
            .loaded_at
            .map_or(true, |at| at.elapsed() >= self.config.ttl);
        if force || table.stale || expired {
            let head = self.queue.head()?;
            for position in table.position + 1..=head {
                let bytes = self.queue.load(position)?;
                let entry: Entry<T> =
                    serde_json::from_slice(&bytes).map_err(|e| JournalError::Corrupt {
                        position,
                        reason: e.to_string(),
                    })?;
                table.apply(entry);
            }
            table.position = head;
            table.loaded_at = Some(Instant::now());
            table.stale = false;
        }
        Ok(table)
    }

    /// Append `entry` once `check` accepts the current value at `key`.
    fn mutate<F>(&self, key: &str, entry: Entry<T>, mut check: F) -> Result<()>
    where
        F: FnMut(Option<&T>) -> Result<()>,
    {
        let data =
            serde_json::to_vec(&entry).map_err(|e| JournalError::Serialization(e.to_string()))?;
        let attempts = self.config.max_retries.max(1);
        for attempt in 0..attempts {
            let position = {
                let table = self.refresh(attempt > 0)?;
                check(table.entries.get(key))?;
                table.position
            };
            match self.queue.commit_at(position + 1, &data)? {
                Append::Committed => {
                    self.table.lock().expect("journal table lock poisoned").stale = true;
                    return Ok(());
                }
                Append::PositionTaken => {
                    debug!(
                        prefix = self.queue.prefix(),
                        key,
                        position = position + 1,
                        attempt,
                        "journal position taken; retrying"
                    );
                    thread::sleep(self.config.retry_delay);
                }
            }
        }
        Err(JournalError::RetriesExceeded { attempts })
    }

    /// Add `value`; fails with [`JournalError::KeyExists`] if its key is
    /// already present.
    pub fn insert(&self, value: T) -> Result<()> {
        let key = value.key();
        self.mutate(&key, Entry::Add(value), |old| match old {
            Some(_) => Err(JournalError::KeyExists(key.clone())),
            None => Ok(()),
        })
    }

    /// Replace the entry under `value`'s key if `constraint` accepts the
    /// current entry.
    pub fn update<C>(&self, value: T, mut constraint: C) -> Result<()>
    where
        C: FnMut(&T) -> bool,
    {
        let key = value.key();
        self.mutate(&key, Entry::Update(value), |old| match old {
            None => Err(JournalError::NotFound(key.clone())),
            Some(old) if !constraint(old) => Err(JournalError::Constraint(key.clone())),
            Some(_) => Ok(()),
        })
    }

    /// Remove the entry under `key` if `constraint` accepts it.
    pub fn delete<C>(&self, key: &str, mut constraint: C) -> Result<()>
    where
        C: FnMut(&T) -> bool,
    {
        self.mutate(key, Entry::Delete(key.to_string()), |old| match old {
            None => Err(JournalError::NotFound(key.to_string())),
            Some(old) if !constraint(old) => Err(JournalError::Constraint(key.to_string())),
            Some(_) => Ok(()),
        })
    }

    /// The current entry under `key`.
    pub fn lookup(&self, key: &str) -> Result<Option<T>> {
        Ok(self.refresh(false)?.entries.get(key).cloned())
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Result<Vec<String>> {
        Ok(self.refresh(false)?.entries.keys().cloned().collect())
    }

    /// All values, sorted by key.
    pub fn values(&self) -> Result<Vec<T>> {
        Ok(self.refresh(false)?.entries.values().cloned().collect())
    }

    /// All `(key, value)` pairs, sorted by key.
    pub fn all(&self) -> Result<Vec<(String, T)>> {
        Ok(self
            .refresh(false)?
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    /// The journal position the cached table reflects.
    pub fn position(&self) -> Result<u64> {
        Ok(self.refresh(false)?.position)
    }
}

impl<T> std::fmt::Debug for Store<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("queue", &self.queue).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lake_storage::InMemoryEngine;

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    struct Tip {
        name: String,
        at: u64,
    }

    impl Keyed for Tip {
        fn key(&self) -> String {
            self.name.clone()
        }
    }

    fn tip(name: &str, at: u64) -> Tip {
        Tip {
            name: name.into(),
            at,
        }
    }

    fn fresh_config() -> JournalConfig {
        JournalConfig {
            ttl: Duration::ZERO,
            max_retries: 32,
            retry_delay: Duration::from_millis(1),
        }
    }

    fn store(engine: Arc<dyn StorageEngine>) -> Store<Tip> {
        Store::new(engine, "branches", fresh_config())
    }

    #[test]
    fn insert_and_lookup() {
        let s = store(Arc::new(InMemoryEngine::new()));
        s.insert(tip("main", 1)).unwrap();
        assert_eq!(s.lookup("main").unwrap(), Some(tip("main", 1)));
        assert_eq!(s.lookup("dev").unwrap(), None);
        assert_eq!(s.position().unwrap(), 1);
    }

    #[test]
    fn duplicate_insert_fails() {
        let s = store(Arc::new(InMemoryEngine::new()));
        s.insert(tip("main", 1)).unwrap();
        let err = s.insert(tip("main", 2)).unwrap_err();
        assert!(matches!(err, JournalError::KeyExists(k) if k == "main"));
    }

    #[test]
    fn update_checks_constraint() {
        let s = store(Arc::new(InMemoryEngine::new()));
        s.insert(tip("main", 1)).unwrap();
        s.update(tip("main", 2), |old| old.at == 1).unwrap();
        assert_eq!(s.lookup("main").unwrap().unwrap().at, 2);

        let err = s.update(tip("main", 3), |old| old.at == 1).unwrap_err();
        assert!(matches!(err, JournalError::Constraint(_)));
        assert_eq!(s.lookup("main").unwrap().unwrap().at, 2);
    }

    #[test]
    fn update_missing_key_fails() {
        let s = store(Arc::new(InMemoryEngine::new()));
        let err = s.update(tip("ghost", 1), |_| true).unwrap_err();
        assert!(matches!(err, JournalError::NotFound(_)));
    }

    #[test]
    fn delete_removes_entry() {
        let s = store(Arc::new(InMemoryEngine::new()));
        s.insert(tip("a", 1)).unwrap();
        s.insert(tip("b", 1)).unwrap();
        s.delete("a", |_| true).unwrap();
        assert_eq!(s.keys().unwrap(), vec!["b"]);
        assert!(matches!(
            s.delete("a", |_| true),
            Err(JournalError::NotFound(_))
        ));
    }

    #[test]
    fn stores_share_state_through_engine() {
        let engine: Arc<dyn StorageEngine> = Arc::new(InMemoryEngine::new());
        let a = store(engine.clone());
        let b = store(engine);
        a.insert(tip("main", 1)).unwrap();
        assert_eq!(b.lookup("main").unwrap(), Some(tip("main", 1)));
        b.update(tip("main", 2), |old| old.at == 1).unwrap();
        assert_eq!(a.values().unwrap(), vec![tip("main", 2)]);
    }

    #[test]
    fn stale_writer_loses_compare_and_swap() {
        let engine: Arc<dyn StorageEngine> = Arc::new(InMemoryEngine::new());
        let config = JournalConfig {
            ttl: Duration::from_secs(3600),
            ..fresh_config()
        };
        let a = Store::<Tip>::new(engine.clone(), "branches", config.clone());
        let b = Store::<Tip>::new(engine, "branches", config);
        a.insert(tip("main", 1)).unwrap();
        // b caches the table at at=1 for an hour.
        assert_eq!(b.lookup("main").unwrap().unwrap().at, 1);
        a.update(tip("main", 2), |old| old.at == 1).unwrap();

        // b still believes at=1, but its append races and it reloads.
        let err = b.update(tip("main", 3), |old| old.at == 1).unwrap_err();
        assert!(matches!(err, JournalError::Constraint(_)));
        assert_eq!(b.lookup("main").unwrap().unwrap().at, 2);
    }

    #[test]
    fn lost_races_exhaust_retries() {
        let engine: Arc<dyn StorageEngine> = Arc::new(InMemoryEngine::new());
        let a = store(engine.clone());
        let b = Store::<Tip>::new(
            engine,
            "branches",
            JournalConfig {
                ttl: Duration::from_secs(3600),
                max_retries: 1,
                retry_delay: Duration::from_millis(1),
            },
        );
        a.insert(tip("main", 1)).unwrap();
        assert_eq!(b.position().unwrap(), 1);
        a.insert(tip("dev", 1)).unwrap();

        // b appends at 2, which a already took, and has no retry left.
        assert!(matches!(
            b.insert(tip("feature", 1)),
            Err(JournalError::RetriesExceeded { attempts: 1 })
        ));
        assert_eq!(a.keys().unwrap(), vec!["dev", "main"]);
    }

    #[test]
    fn concurrent_inserts_all_land() {
        let engine: Arc<dyn StorageEngine> = Arc::new(InMemoryEngine::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let engine = engine.clone();
                thread::spawn(move || store(engine).insert(tip(&format!("b{i}"), i)))
            })
            .collect();
        for h in handles {
            h.join().expect("thread should not panic").unwrap();
        }
        assert_eq!(store(engine).keys().unwrap().len(), 8);
    }

    #[test]
    fn corrupt_entry_is_reported() {
        let engine: Arc<dyn StorageEngine> = Arc::new(InMemoryEngine::new());
        engine.put("branches/1.json", b"not json").unwrap();
        let s = store(engine);
        assert!(matches!(
            s.lookup("main"),
            Err(JournalError::Corrupt { position: 1, .. })
        ));
    }

    #[test]
    fn works_without_conditional_put() {
        let s = store(Arc::new(InMemoryEngine::without_conditional_put()));
        s.insert(tip("main", 1)).unwrap();
        s.update(tip("main", 2), |old| old.at == 1).unwrap();
        assert_eq!(s.lookup("main").unwrap().unwrap().at, 2);
    }
}
