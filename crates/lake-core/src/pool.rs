//! Pools: sorted datasets with their own history and branches.
//!
//! Storage layout of a pool, under its ID:
//!
//! ```text
//! <pool-id>/branches/   branch journal, keyed by branch name
//! <pool-id>/commits/    commit objects and snapshot checkpoints
//! <pool-id>/data/       data objects
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::Receiver;
use lake_commits::{CommitStore, Snapshot};
use lake_data::{DataObjectStore, RowStore};
use lake_journal::{JournalError, Keyed, Store};
use lake_storage::{join_key, StorageEngine};
use lake_types::{Id, SortKey};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::branch::Branch;
use crate::config::LakeConfig;
use crate::error::{LakeError, Result};
use crate::names::validate_branch_name;

/// The branch every pool starts with.
pub const MAIN_BRANCH: &str = "main";

/// Registry entry of a pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub id: Id,
    pub name: String,
    /// Sort field and direction of the pool.
    pub sort_key: SortKey,
    /// Target size of a data object, in bytes.
    pub threshold: u64,
}

impl Keyed for PoolConfig {
    fn key(&self) -> String {
        self.id.to_string()
    }
}

/// A named pointer into a pool's commit history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchConfig {
    pub name: String,
    /// The tip commit; nil for a branch with no commits.
    pub commit: Id,
}

impl Keyed for BranchConfig {
    fn key(&self) -> String {
        self.name.clone()
    }
}

pub struct Pool {
    config: PoolConfig,
    engine: Arc<dyn StorageEngine>,
    pub(crate) commits: CommitStore,
    pub(crate) branches: Store<BranchConfig>,
    pub(crate) data: Arc<dyn DataObjectStore>,
    settings: LakeConfig,
}

impl Pool {
    /// Open a pool with the row-oriented data store.
    pub fn open(engine: Arc<dyn StorageEngine>, config: PoolConfig, settings: LakeConfig) -> Self {
        let prefix = config.id.to_string();
        let data = Arc::new(RowStore::new(
            engine.clone(),
            &prefix,
            config.sort_key.clone(),
            config.threshold,
        ));
        Self::with_data_store(engine, config, settings, data)
    }

    /// Open a pool whose rows are written and read by `data`.
    pub fn with_data_store(
        engine: Arc<dyn StorageEngine>,
        config: PoolConfig,
        settings: LakeConfig,
        data: Arc<dyn DataObjectStore>,
    ) -> Self {
        let prefix = config.id.to_string();
        Self {
            commits: CommitStore::new(engine.clone(), &prefix, settings.cache_config()),
            branches: Store::new(
                engine.clone(),
                join_key(&[&prefix, "branches"]),
                settings.journal_config(),
            ),
            data,
            config,
            engine,
            settings,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn id(&self) -> Id {
        self.config.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn settings(&self) -> &LakeConfig {
        &self.settings
    }

    pub fn commits(&self) -> &CommitStore {
        &self.commits
    }

    pub fn data(&self) -> &Arc<dyn DataObjectStore> {
        &self.data
    }

    fn branch_not_found(&self, name: &str) -> LakeError {
        LakeError::BranchNotFound {
            pool: self.config.name.clone(),
            branch: name.to_string(),
        }
    }

    /// The current config of branch `name`, fresh from the journal.
    pub fn branch_config(&self, name: &str) -> Result<BranchConfig> {
        self.branches
            .lookup(name)?
            .ok_or_else(|| self.branch_not_found(name))
    }

    pub fn list_branches(&self) -> Result<Vec<BranchConfig>> {
        Ok(self.branches.values()?)
    }

    /// Create branch `name` pointing at `commit` (nil for an empty branch).
    pub fn create_branch(&self, name: &str, commit: Id) -> Result<BranchConfig> {
        validate_branch_name(name)?;
        if !commit.is_nil() {
            // Fails with CommitNotFound for an unknown commit.
            self.commits.get(commit)?;
        }
        let config = BranchConfig {
            name: name.to_string(),
            commit,
        };
        match self.branches.insert(config.clone()) {
            Ok(()) => {}
            Err(JournalError::KeyExists(_)) => {
                return Err(LakeError::BranchExists {
                    pool: self.config.name.clone(),
                    branch: name.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        }
        info!(pool = %self.config.name, branch = name, commit = %commit, "created branch");
        Ok(config)
    }

    pub fn remove_branch(&self, name: &str) -> Result<()> {
        match self.branches.delete(name, |_| true) {
            Ok(()) => {}
            Err(JournalError::NotFound(_)) => return Err(self.branch_not_found(name)),
            Err(e) => return Err(e.into()),
        }
        info!(pool = %self.config.name, branch = name, "removed branch");
        Ok(())
    }

    pub fn open_branch(self: &Arc<Self>, name: &str) -> Result<Branch> {
        let config = self.branch_config(name)?;
        Ok(Branch::new(config, Arc::clone(self)))
    }

    /// The pool state at `commit`.
    pub fn snapshot(&self, commit: Id) -> Result<Arc<Snapshot>> {
        Ok(self.commits.snapshot(commit)?)
    }

    /// Data objects that dropped out of the history of `branch` and are
    /// live in no branch tip. Unless `dry_run`, their rows are removed.
    pub fn vacuum(&self, branch: &str, dry_run: bool) -> Result<Vec<Id>> {
        let (_cancel, cancel) = crossbeam_channel::bounded(1);
        self.vacuum_with_cancel(branch, dry_run, &cancel)
    }

    /// [`Pool::vacuum`], aborted with `Canceled` when `cancel` fires or
    /// disconnects.
    pub fn vacuum_with_cancel(
        &self,
        branch: &str,
        dry_run: bool,
        cancel: &Receiver<()>,
    ) -> Result<Vec<Id>> {
        let tip = self.branch_config(branch)?.commit;
        let mut live = BTreeSet::new();
        for config in self.list_branches()? {
            live.extend(self.commits.snapshot(config.commit)?.ids().copied());
        }

        let (tx, rx) = crossbeam_channel::bounded(self.settings.vacuum_channel_capacity.max(1));
        let cancel = cancel.clone();
        let (walked, ids) = thread::scope(|s| {
            let walker = s.spawn(move || self.commits.vacuumable(tip, &tx, &cancel));
            let ids: Vec<Id> = rx.iter().filter(|id| !live.contains(id)).collect();
            (walker.join(), ids)
        });
        walked.map_err(|_| LakeError::Internal("vacuum walker panicked".into()))??;

        if !dry_run {
            for id in &ids {
                self.data.remove(*id)?;
            }
        }
        info!(
            pool = %self.config.name,
            branch,
            objects = ids.len(),
            dry_run,
            "vacuumed"
        );
        Ok(ids)
    }

    /// Delete every blob of the pool.
    pub(crate) fn destroy(&self) -> Result<usize> {
        let removed = self
            .engine
            .delete_by_prefix(&format!("{}/", self.config.id))?;
        debug!(pool = %self.config.name, removed, "deleted pool storage");
        Ok(removed)
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
