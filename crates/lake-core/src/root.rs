//! The lake root: version marker, pool registry and pool handles.
//!
//! ```text
//! lake.json        version marker
//! pools/           pool registry journal, keyed by pool ID
//! <pool-id>/...    per-pool storage, see [`crate::pool`]
//! ```

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use lake_commits::CommitObject;
use lake_journal::{JournalError, Store};
use lake_storage::StorageEngine;
use lake_types::{Id, SortKey};
use tracing::{debug, info};

use crate::branch::Branch;
use crate::config::LakeConfig;
use crate::error::{LakeError, Result};
use crate::names::validate_pool_name;
use crate::pool::{BranchConfig, Pool, PoolConfig, MAIN_BRANCH};
use crate::version::{check_marker, write_marker};

const POOLS_PREFIX: &str = "pools";

pub struct Root {
    engine: Arc<dyn StorageEngine>,
    pools: Store<PoolConfig>,
    cache: RwLock<HashMap<Id, Arc<Pool>>>,
    settings: LakeConfig,
}

impl Root {
    fn new(engine: Arc<dyn StorageEngine>, settings: LakeConfig) -> Self {
        Self {
            pools: Store::new(engine.clone(), POOLS_PREFIX, settings.journal_config()),
            cache: RwLock::new(HashMap::new()),
            engine,
            settings,
        }
    }

    /// Initialize a new lake on `engine`.
    pub fn create(engine: Arc<dyn StorageEngine>, settings: LakeConfig) -> Result<Self> {
        write_marker(engine.as_ref())?;
        Ok(Self::new(engine, settings))
    }

    /// Open an existing lake on `engine`.
    pub fn open(engine: Arc<dyn StorageEngine>, settings: LakeConfig) -> Result<Self> {
        check_marker(engine.as_ref())?;
        Ok(Self::new(engine, settings))
    }

    pub fn settings(&self) -> &LakeConfig {
        &self.settings
    }

    /// Find a pool config by ID or by name.
    pub fn lookup_pool(&self, name_or_id: &str) -> Result<PoolConfig> {
        if let Ok(id) = name_or_id.parse::<Id>() {
            if let Some(config) = self.pools.lookup(&id.to_string())? {
                return Ok(config);
            }
        }
        self.pools
            .values()?
            .into_iter()
            .find(|config| config.name == name_or_id)
            .ok_or_else(|| LakeError::PoolNotFound(name_or_id.to_string()))
    }

    /// All pools, ordered by ID.
    pub fn list_pools(&self) -> Result<Vec<PoolConfig>> {
        Ok(self.pools.values()?)
    }

    fn name_taken(&self, name: &str) -> Result<bool> {
        Ok(self.pools.values()?.iter().any(|config| config.name == name))
    }

    /// Register a new pool and give it an empty `main` branch.
    pub fn create_pool(&self, name: &str, sort_key: SortKey, threshold: u64) -> Result<PoolConfig> {
        validate_pool_name(name)?;
        if self.name_taken(name)? {
            return Err(LakeError::PoolExists(name.to_string()));
        }
        let config = PoolConfig {
            id: Id::new(),
            name: name.to_string(),
            sort_key,
            threshold,
        };
        match self.pools.insert(config.clone()) {
            Ok(()) => {}
            Err(JournalError::KeyExists(_)) => return Err(LakeError::PoolExists(name.to_string())),
            Err(e) => return Err(e.into()),
        }
        self.pool(&config).create_branch(MAIN_BRANCH, Id::nil())?;
        info!(pool = name, id = %config.id, sort_key = %config.sort_key, "created pool");
        Ok(config)
    }

    /// Unregister a pool and delete all of its storage.
    pub fn remove_pool(&self, name_or_id: &str) -> Result<()> {
        let config = self.lookup_pool(name_or_id)?;
        match self.pools.delete(&config.id.to_string(), |_| true) {
            Ok(()) => {}
            Err(JournalError::NotFound(_)) => {
                return Err(LakeError::PoolNotFound(name_or_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        }
        let pool = self.pool(&config);
        self.invalidate(config.id);
        pool.destroy()?;
        info!(pool = %config.name, id = %config.id, "removed pool");
        Ok(())
    }

    /// Give a pool a new name.
    ///
    /// The uniqueness check and the rename are separate steps; two
    /// concurrent renames to the same name can both succeed.
    pub fn rename_pool(&self, name_or_id: &str, new_name: &str) -> Result<PoolConfig> {
        validate_pool_name(new_name)?;
        let old = self.lookup_pool(name_or_id)?;
        if old.name == new_name {
            return Ok(old);
        }
        if self.name_taken(new_name)? {
            return Err(LakeError::PoolExists(new_name.to_string()));
        }
        let renamed = PoolConfig {
            name: new_name.to_string(),
            ..old.clone()
        };
        match self
            .pools
            .update(renamed.clone(), |stored| stored.name == old.name)
        {
            Ok(()) => {}
            Err(JournalError::NotFound(_)) => {
                return Err(LakeError::PoolNotFound(name_or_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        }
        self.invalidate(old.id);
        info!(id = %old.id, from = %old.name, to = new_name, "renamed pool");
        Ok(renamed)
    }

    fn invalidate(&self, id: Id) {
        self.cache.write().expect("lock poisoned").remove(&id);
    }

    /// The cached handle for `config`, opened on first use and reopened
    /// when the registry entry changed under it.
    fn pool(&self, config: &PoolConfig) -> Arc<Pool> {
        if let Some(pool) = self.cache.read().expect("lock poisoned").get(&config.id) {
            if pool.config() == config {
                return pool.clone();
            }
        }
        let mut cache = self.cache.write().expect("lock poisoned");
        if let Some(pool) = cache.get(&config.id) {
            if pool.config() == config {
                return pool.clone();
            }
        }
        debug!(pool = %config.name, id = %config.id, "opening pool");
        let pool = Arc::new(Pool::open(
            self.engine.clone(),
            config.clone(),
            self.settings.clone(),
        ));
        cache.insert(config.id, pool.clone());
        pool
    }

    pub fn open_pool(&self, name_or_id: &str) -> Result<Arc<Pool>> {
        let config = self.lookup_pool(name_or_id)?;
        Ok(self.pool(&config))
    }

    pub fn create_branch(&self, pool: &str, name: &str, commit: Id) -> Result<BranchConfig> {
        self.open_pool(pool)?.create_branch(name, commit)
    }

    pub fn remove_branch(&self, pool: &str, name: &str) -> Result<()> {
        self.open_pool(pool)?.remove_branch(name)
    }

    pub fn open_branch(&self, pool: &str, name: &str) -> Result<Branch> {
        self.open_pool(pool)?.open_branch(name)
    }

    /// Merge branch `child` into branch `parent` of `pool`.
    pub fn merge_branch(
        &self,
        pool: &str,
        child: &str,
        parent: &str,
        author: &str,
        message: &str,
    ) -> Result<Id> {
        let pool = self.open_pool(pool)?;
        let child = pool.open_branch(child)?;
        let parent = pool.open_branch(parent)?;
        child.merge_into(&parent, author, message)
    }

    pub fn revert(&self, pool: &str, branch: &str, commit: Id, author: &str) -> Result<Id> {
        self.open_branch(pool, branch)?.revert(commit, author)
    }

    pub fn commit_object(&self, pool: &str, commit: Id) -> Result<Arc<CommitObject>> {
        Ok(self.open_pool(pool)?.commits().get(commit)?)
    }

    pub fn vacuum(&self, pool: &str, branch: &str, dry_run: bool) -> Result<Vec<Id>> {
        self.open_pool(pool)?.vacuum(branch, dry_run)
    }
}

impl std::fmt::Debug for Root {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Root")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lake_commits::{Action, CommitError};
    use lake_data::Record;
    use lake_storage::{FileEngine, InMemoryEngine};
    use lake_types::Order;
    use serde_json::json;

    fn root() -> Root {
        Root::create(Arc::new(InMemoryEngine::new()), LakeConfig::default()).unwrap()
    }

    fn ts() -> SortKey {
        SortKey::new("ts", Order::Asc)
    }

    fn records(values: &[i64]) -> Vec<Record> {
        values
            .iter()
            .map(|ts| match json!({ "ts": ts, "host": "a" }) {
                serde_json::Value::Object(map) => map,
                _ => unreachable!(),
            })
            .collect()
    }

    #[test]
    fn open_requires_a_lake() {
        let engine = Arc::new(InMemoryEngine::new());
        assert!(matches!(
            Root::open(engine.clone(), LakeConfig::default()),
            Err(LakeError::NotALake)
        ));
        Root::create(engine.clone(), LakeConfig::default()).unwrap();
        assert!(Root::open(engine.clone(), LakeConfig::default()).is_ok());
        assert!(matches!(
            Root::create(engine, LakeConfig::default()),
            Err(LakeError::LakeExists)
        ));
    }

    #[test]
    fn pools_are_found_by_name_or_id() {
        let root = root();
        let config = root.create_pool("logs", ts(), 1024).unwrap();
        assert_eq!(root.lookup_pool("logs").unwrap(), config);
        assert_eq!(root.lookup_pool(&config.id.to_string()).unwrap(), config);
        assert!(matches!(
            root.create_pool("logs", ts(), 1024),
            Err(LakeError::PoolExists(_))
        ));
        assert!(matches!(root.open_pool("nope"), Err(LakeError::PoolNotFound(_))));

        let main = root.open_pool("logs").unwrap().branch_config(MAIN_BRANCH).unwrap();
        assert!(main.commit.is_nil());
        assert!(Arc::ptr_eq(
            &root.open_pool("logs").unwrap(),
            &root.open_pool(&config.id.to_string()).unwrap()
        ));
    }

    #[test]
    fn rename_and_remove_pool() {
        let root = root();
        root.create_pool("logs", ts(), 1024).unwrap();
        root.create_pool("metrics", ts(), 1024).unwrap();
        root.open_branch("logs", MAIN_BRANCH)
            .unwrap()
            .load(records(&[1]), "a", "m", Default::default())
            .unwrap();

        assert!(matches!(
            root.rename_pool("logs", "metrics"),
            Err(LakeError::PoolExists(_))
        ));
        let before = root.open_pool("logs").unwrap();
        let renamed = root.rename_pool("logs", "events").unwrap();
        assert_eq!(renamed.name, "events");
        let after = root.open_pool("events").unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.name(), "events");
        assert!(matches!(root.lookup_pool("logs"), Err(LakeError::PoolNotFound(_))));

        root.remove_pool("events").unwrap();
        let names: Vec<String> = root.list_pools().unwrap().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["metrics".to_string()]);
        assert!(root.engine.list(&format!("{}/", renamed.id)).unwrap().is_empty());
    }

    #[test]
    fn pool_handles_follow_renames_by_other_roots() {
        let engine = Arc::new(InMemoryEngine::new());
        let settings = LakeConfig {
            journal_ttl_ms: 0,
            ..LakeConfig::default()
        };
        let ours = Root::create(engine.clone(), settings.clone()).unwrap();
        let theirs = Root::open(engine, settings).unwrap();
        let config = ours.create_pool("logs", ts(), 1024).unwrap();
        assert_eq!(ours.open_pool("logs").unwrap().name(), "logs");

        theirs.rename_pool("logs", "events").unwrap();
        let pool = ours.open_pool(&config.id.to_string()).unwrap();
        assert_eq!(pool.name(), "events");
        assert!(Arc::ptr_eq(&pool, &ours.open_pool("events").unwrap()));
    }

    #[test]
    fn branch_operations_through_the_root() {
        let root = root();
        root.create_pool("logs", ts(), 1024).unwrap();
        let main = root.open_branch("logs", MAIN_BRANCH).unwrap();
        let c1 = main.load(records(&[1]), "a", "one", Default::default()).unwrap();
        root.create_branch("logs", "dev", c1).unwrap();
        root.open_branch("logs", "dev")
            .unwrap()
            .load(records(&[2]), "a", "two", Default::default())
            .unwrap();

        let merged = root.merge_branch("logs", "dev", MAIN_BRANCH, "a", "merge").unwrap();
        let object = root.commit_object("logs", merged).unwrap();
        assert_eq!(object.parent, c1);
        assert!(object.changes().iter().all(|a| matches!(a, Action::Add(_))));

        let reverted = root.revert("logs", MAIN_BRANCH, merged, "a").unwrap();
        assert_eq!(main.snapshot().unwrap().len(), 1);
        assert_eq!(main.tip().unwrap(), reverted);

        root.remove_branch("logs", "dev").unwrap();
        let vacuumed = root.vacuum("logs", MAIN_BRANCH, false).unwrap();
        assert_eq!(vacuumed.len(), 1);
        assert!(matches!(
            root.commit_object("logs", Id::new()),
            Err(LakeError::Commit(CommitError::CommitNotFound(_)))
        ));
    }

    #[test]
    fn file_engine_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(FileEngine::open(dir.path()).unwrap());
        let root = Root::create(engine.clone(), LakeConfig::default()).unwrap();
        root.create_pool("logs", SortKey::new("ts", Order::Desc), 32).unwrap();
        let main = root.open_branch("logs", MAIN_BRANCH).unwrap();
        let tip = main.load(records(&[1, 2, 3, 4]), "a", "load", Default::default()).unwrap();
        let objects = main.snapshot().unwrap().len();
        assert!(objects >= 2);

        // A second handle on the same directory sees the same state.
        let reopened = Root::open(engine, LakeConfig::default()).unwrap();
        let branch = reopened.open_branch("logs", MAIN_BRANCH).unwrap();
        assert_eq!(branch.tip().unwrap(), tip);
        assert_eq!(branch.snapshot().unwrap().len(), objects);
    }
}
