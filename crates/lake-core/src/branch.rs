//! Branch mutations.
//!
//! Every mutation builds a complete candidate commit on top of the tip it
//! read, stores it, and then tries to move the branch pointer from that tip
//! to the candidate. If another writer moved the branch first, the
//! candidate is discarded and rebuilt on the new tip.

use std::sync::Arc;
use std::thread;

use lake_commits::{diff, Action, CommitError, CommitObject, Meta, Patch, Snapshot, View, Writeable};
use lake_data::Record;
use lake_journal::JournalError;
use lake_types::{DataObject, Id};
use tracing::{debug, info, warn};

use crate::error::{LakeError, Result};
use crate::pool::{BranchConfig, Pool};

pub struct Branch {
    config: BranchConfig,
    pool: Arc<Pool>,
}

impl Branch {
    pub(crate) fn new(config: BranchConfig, pool: Arc<Pool>) -> Self {
        Self { config, pool }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The branch config as of opening.
    pub fn config(&self) -> &BranchConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    /// The current tip, read from the journal.
    pub fn tip(&self) -> Result<Id> {
        Ok(self.pool.branch_config(&self.config.name)?.commit)
    }

    /// The pool state at the current tip.
    pub fn snapshot(&self) -> Result<Arc<Snapshot>> {
        self.pool.snapshot(self.tip()?)
    }

    /// Build, store and publish a commit.
    ///
    /// `create` gets the branch as read for this attempt and the number of
    /// attempts lost so far, and returns the candidate. Errors from `create`
    /// abort without retrying.
    pub fn commit<F>(&self, mut create: F) -> Result<Id>
    where
        F: FnMut(&BranchConfig, u32) -> Result<CommitObject>,
    {
        let settings = self.pool.settings();
        let attempts = settings.max_commit_retries.max(1);
        for retries in 0..attempts {
            let parent = self.pool.branch_config(&self.config.name)?;
            let candidate = create(&parent, retries)?;
            self.pool.commits.put(&candidate)?;

            let next = BranchConfig {
                name: parent.name.clone(),
                commit: candidate.commit,
            };
            match self
                .pool
                .branches
                .update(next, |stored| stored.commit == parent.commit)
            {
                Ok(()) => {
                    info!(
                        pool = %self.pool.name(),
                        branch = %self.config.name,
                        commit = %candidate.commit,
                        parent = %parent.commit,
                        retries,
                        "committed"
                    );
                    return Ok(candidate.commit);
                }
                Err(JournalError::Constraint(_)) => {
                    self.discard(candidate.commit);
                    debug!(
                        branch = %self.config.name,
                        parent = %parent.commit,
                        attempt = retries,
                        "branch moved; retrying commit"
                    );
                    thread::sleep(settings.commit_retry_delay());
                }
                Err(e) => {
                    self.discard(candidate.commit);
                    return Err(match e {
                        JournalError::NotFound(_) => LakeError::BranchNotFound {
                            pool: self.pool.name().to_string(),
                            branch: self.config.name.clone(),
                        },
                        other => other.into(),
                    });
                }
            }
        }
        Err(LakeError::CommitFailed { attempts })
    }

    fn discard(&self, orphan: Id) {
        if let Err(e) = self.pool.commits.remove(orphan) {
            warn!(commit = %orphan, error = %e, "failed to remove orphaned commit");
        }
    }

    fn discard_objects(&self, objects: &[DataObject]) {
        for object in objects {
            if let Err(e) = self.pool.data.remove(object.id) {
                warn!(object = %object.id, error = %e, "failed to remove unreferenced data object");
            }
        }
    }

    /// A patch over the snapshot at `parent`.
    fn patch_at(&self, parent: &BranchConfig) -> Result<Patch> {
        let base: Arc<dyn View> = self.pool.snapshot(parent.commit)?;
        Ok(Patch::new(base))
    }

    /// Write `records` as new data objects and commit them.
    pub fn load(&self, records: Vec<Record>, author: &str, message: &str, meta: Meta) -> Result<Id> {
        if records.is_empty() {
            return Err(LakeError::EmptyTransaction);
        }
        let objects = self.pool.data.write(records)?;
        if objects.is_empty() {
            return Err(LakeError::EmptyTransaction);
        }
        let result = self.commit(|parent, retries| {
            let mut object =
                CommitObject::new(parent.commit, author, message, meta.clone(), retries);
            for added in &objects {
                object.append(Action::Add(added.clone()));
            }
            Ok(object)
        });
        if result.is_err() {
            self.discard_objects(&objects);
        }
        result
    }

    /// Remove data objects by ID.
    pub fn delete(&self, ids: &[Id], author: &str, message: &str) -> Result<Id> {
        if ids.is_empty() {
            return Err(LakeError::EmptyTransaction);
        }
        self.commit(|parent, retries| {
            let mut patch = self.patch_at(parent)?;
            for id in ids {
                patch.delete_object(*id)?;
            }
            Ok(patch.new_commit_object(parent.commit, retries, author, message, Meta::new()))
        })
    }

    /// Remove every row matching `predicate`.
    ///
    /// Objects holding matching rows are replaced by objects holding the
    /// rest of their rows. Nothing matching is an empty transaction.
    pub fn delete_where(
        &self,
        predicate: &dyn Fn(&Record) -> bool,
        author: &str,
        message: &str,
    ) -> Result<Id> {
        let mut written: Vec<Vec<DataObject>> = Vec::new();
        let result = self.commit(|parent, retries| {
            let mut patch = self.patch_at(parent)?;
            let outcome = self
                .pool
                .data
                .delete_rows(&patch.select_all(), predicate)?;
            if outcome.is_empty() {
                return Err(LakeError::EmptyTransaction);
            }
            written.push(outcome.replacements.clone());
            for id in &outcome.deleted {
                patch.delete_object(*id)?;
            }
            for replacement in outcome.replacements {
                patch.add_data_object(replacement)?;
            }
            debug!(rows = outcome.rows, objects = outcome.deleted.len(), "rows deleted");
            Ok(patch.new_commit_object(parent.commit, retries, author, message, Meta::new()))
        });
        // Replacements of lost attempts (or of every attempt on failure)
        // are referenced by no commit.
        if result.is_ok() {
            written.pop();
        }
        for objects in &written {
            self.discard_objects(objects);
        }
        result
    }

    /// Undo `commit` on this branch.
    pub fn revert(&self, commit: Id, author: &str) -> Result<Id> {
        let patch = self.pool.commits.patch_of_commit(commit)?;
        let message = format!("revert {commit}");
        self.commit(|parent, retries| {
            let tip = self.pool.snapshot(parent.commit)?;
            Ok(patch.revert(&*tip, commit, parent.commit, retries, author, &message)?)
        })
    }

    /// Replace the objects `src` with `rollup`, which holds the same rows.
    pub fn commit_compact(
        &self,
        src: &[Id],
        rollup: &[DataObject],
        author: &str,
        message: &str,
    ) -> Result<Id> {
        if rollup.is_empty() {
            return Err(LakeError::EmptyTransaction);
        }
        self.commit(|parent, retries| {
            let mut patch = self.patch_at(parent)?;
            for id in src {
                patch.delete_object(*id)?;
            }
            for object in rollup {
                patch.add_data_object(object.clone())?;
            }
            Ok(patch.new_commit_object(parent.commit, retries, author, message, Meta::new()))
        })
    }

    /// Rewrite the rows of objects `ids` into fresh objects and commit the
    /// swap.
    pub fn compact(&self, ids: &[Id], author: &str) -> Result<Id> {
        if ids.is_empty() {
            return Err(LakeError::EmptyTransaction);
        }
        let snapshot = self.snapshot()?;
        let objects = ids
            .iter()
            .map(|id| {
                snapshot
                    .lookup(id)
                    .cloned()
                    .ok_or(LakeError::Commit(CommitError::NotFound(*id)))
            })
            .collect::<Result<Vec<_>>>()?;
        let rollup = self.pool.data.rewrite(&objects)?;
        let message = format!("compacted {} objects", ids.len());
        let result = self.commit_compact(ids, &rollup, author, &message);
        if result.is_err() {
            self.discard_objects(&rollup);
        }
        result
    }

    /// Apply everything this branch changed since it split from `parent`
    /// onto `parent`.
    pub fn merge_into(&self, parent: &Branch, author: &str, message: &str) -> Result<Id> {
        let child_tip = self.tip()?;
        let commits = &self.pool.commits;
        let mut meta = Meta::new();
        meta.insert("merged_from".into(), self.config.name.clone());
        parent.commit(|target, retries| {
            let base_id = commits.common_ancestor(child_tip, target.commit)?;
            let base: Arc<dyn View> = commits.snapshot(base_id)?;
            let theirs = commits.patch_of_path(base.clone(), base_id, target.commit)?;
            let ours = commits.patch_of_path(base, base_id, child_tip)?;
            let merged = diff(theirs, &ours)?;
            debug!(base = %base_id, child = %child_tip, parent = %target.commit, "merging");
            Ok(merged.new_commit_object(target.commit, retries, author, message, meta.clone()))
        })
    }

    /// Mark objects as vectorized.
    pub fn add_vectors(&self, ids: &[Id], author: &str, message: &str) -> Result<Id> {
        if ids.is_empty() {
            return Err(LakeError::EmptyTransaction);
        }
        self.commit(|parent, retries| {
            let mut patch = self.patch_at(parent)?;
            for id in ids {
                if !patch.exists(id) {
                    return Err(CommitError::NotFound(*id).into());
                }
                patch.add_vector(*id)?;
            }
            Ok(patch.new_commit_object(parent.commit, retries, author, message, Meta::new()))
        })
    }

    pub fn delete_vectors(&self, ids: &[Id], author: &str, message: &str) -> Result<Id> {
        if ids.is_empty() {
            return Err(LakeError::EmptyTransaction);
        }
        self.commit(|parent, retries| {
            let mut patch = self.patch_at(parent)?;
            for id in ids {
                patch.delete_vector(*id)?;
            }
            Ok(patch.new_commit_object(parent.commit, retries, author, message, Meta::new()))
        })
    }
}

impl std::fmt::Debug for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Branch")
            .field("pool", &self.pool.name())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LakeConfig;
    use crate::pool::{PoolConfig, MAIN_BRANCH};
    use lake_storage::{InMemoryEngine, StorageEngine};
    use lake_types::{Key, Order, SortKey};
    use serde_json::json;

    fn pool_on(engine: Arc<dyn StorageEngine>, settings: LakeConfig) -> Arc<Pool> {
        let config = PoolConfig {
            id: Id::new(),
            name: "events".into(),
            sort_key: SortKey::new("ts", Order::Asc),
            threshold: 1 << 20,
        };
        let pool = Pool::open(engine, config, settings);
        pool.create_branch(MAIN_BRANCH, Id::nil()).unwrap();
        Arc::new(pool)
    }

    fn pool() -> Arc<Pool> {
        pool_on(Arc::new(InMemoryEngine::new()), LakeConfig::default())
    }

    fn records(values: &[i64]) -> Vec<Record> {
        values
            .iter()
            .map(|ts| match json!({ "ts": ts }) {
                serde_json::Value::Object(map) => map,
                _ => unreachable!(),
            })
            .collect()
    }

    fn ids(snapshot: &Snapshot) -> Vec<Id> {
        snapshot.ids().copied().collect()
    }

    #[test]
    fn load_delete_revert_scenario() {
        let pool = pool();
        let main = pool.open_branch(MAIN_BRANCH).unwrap();
        assert!(main.tip().unwrap().is_nil());

        let c1 = main.load(records(&[1, 2]), "alice", "first", Meta::new()).unwrap();
        let o1 = ids(&main.snapshot().unwrap());
        assert_eq!(o1.len(), 1);
        let c2 = main.load(records(&[3]), "alice", "second", Meta::new()).unwrap();
        let s2 = pool.snapshot(c2).unwrap();
        assert_eq!(s2.len(), 2);
        let o2: Vec<Id> = ids(&s2).into_iter().filter(|id| !o1.contains(id)).collect();

        let c3 = main.delete(&o1, "alice", "drop first").unwrap();
        assert_eq!(ids(&pool.snapshot(c3).unwrap()), o2);

        let c4 = main.revert(c3, "alice").unwrap();
        assert_eq!(*pool.snapshot(c4).unwrap(), *s2);
        assert_eq!(pool.commits().path(c4).unwrap().as_slice(), &[c4, c3, c2, c1]);
        assert_eq!(pool.commits().get(c4).unwrap().info().message, format!("revert {c3}"));
    }

    #[test]
    fn revert_of_revert_restores_pre_commit_state() {
        let pool = pool();
        let main = pool.open_branch(MAIN_BRANCH).unwrap();
        main.load(records(&[1]), "a", "one", Meta::new()).unwrap();
        let before = main.snapshot().unwrap();
        let c = main.load(records(&[2]), "a", "two", Meta::new()).unwrap();
        let r1 = main.revert(c, "a").unwrap();
        assert_eq!(*pool.snapshot(r1).unwrap(), *before);
        let r2 = main.revert(r1, "a").unwrap();
        assert_eq!(*pool.snapshot(r2).unwrap(), *pool.snapshot(c).unwrap());
        assert!(matches!(
            main.revert(r1, "a"),
            Err(LakeError::Commit(CommitError::EmptyRevert))
        ));
    }

    #[test]
    fn concurrent_loads_all_land() {
        let pool = pool();
        let writers = 8;
        thread::scope(|s| {
            for n in 0..writers {
                let pool = pool.clone();
                s.spawn(move || {
                    let branch = pool.open_branch(MAIN_BRANCH).unwrap();
                    branch
                        .load(records(&[n]), "writer", "concurrent", Meta::new())
                        .unwrap();
                });
            }
        });
        let main = pool.open_branch(MAIN_BRANCH).unwrap();
        let snapshot = main.snapshot().unwrap();
        assert_eq!(snapshot.len(), writers as usize);
        assert_eq!(pool.commits().path(main.tip().unwrap()).unwrap().len(), writers as usize);
    }

    #[test]
    fn empty_load_is_rejected() {
        let main = pool().open_branch(MAIN_BRANCH).unwrap();
        assert!(matches!(
            main.load(Vec::new(), "a", "m", Meta::new()),
            Err(LakeError::EmptyTransaction)
        ));
    }

    #[test]
    fn deleting_unknown_object_is_not_found() {
        let main = pool().open_branch(MAIN_BRANCH).unwrap();
        let id = Id::new();
        assert!(matches!(
            main.delete(&[id], "a", "m"),
            Err(LakeError::Commit(CommitError::NotFound(x))) if x == id
        ));
    }

    #[test]
    fn losing_every_race_fails_without_leftovers() {
        let engine = Arc::new(InMemoryEngine::new());
        let settings = LakeConfig {
            max_commit_retries: 3,
            commit_retry_delay_ms: 0,
            ..LakeConfig::default()
        };
        let pool = pool_on(engine.clone(), settings);
        let main = pool.open_branch(MAIN_BRANCH).unwrap();
        let mut candidates = Vec::new();
        let result = main.commit(|parent, retries| {
            // Another writer moves the branch after every read.
            pool.branches
                .update(
                    BranchConfig {
                        name: MAIN_BRANCH.into(),
                        commit: Id::new(),
                    },
                    |_| true,
                )
                .unwrap();
            let object = CommitObject::new(parent.commit, "a", "m", Meta::new(), retries);
            candidates.push(object.commit);
            Ok(object)
        });
        assert!(matches!(result, Err(LakeError::CommitFailed { attempts: 3 })));
        assert_eq!(candidates.len(), 3);
        for id in candidates {
            assert!(!pool.commits().exists(id).unwrap());
        }
        assert!(engine.list(pool.commits().prefix()).unwrap().is_empty());
    }

    #[test]
    fn commit_records_retry_count() {
        let pool = pool();
        let main = pool.open_branch(MAIN_BRANCH).unwrap();
        let mut moved = false;
        let id = main
            .commit(|parent, retries| {
                if !moved {
                    moved = true;
                    pool.branches
                        .update(
                            BranchConfig {
                                name: MAIN_BRANCH.into(),
                                commit: parent.commit,
                            },
                            |_| true,
                        )
                        .unwrap();
                    let sneaky = CommitObject::new(parent.commit, "b", "other", Meta::new(), 0);
                    pool.commits().put(&sneaky).unwrap();
                    pool.branches
                        .update(
                            BranchConfig {
                                name: MAIN_BRANCH.into(),
                                commit: sneaky.commit,
                            },
                            |_| true,
                        )
                        .unwrap();
                }
                Ok(CommitObject::new(parent.commit, "a", "m", Meta::new(), retries))
            })
            .unwrap();
        assert_eq!(pool.commits().get(id).unwrap().info().retries, 1);
    }

    #[test]
    fn delete_where_replaces_partial_objects() {
        let pool = pool();
        let main = pool.open_branch(MAIN_BRANCH).unwrap();
        main.load(records(&[1, 2, 3]), "a", "load", Meta::new()).unwrap();
        let before = main.snapshot().unwrap();
        main.delete_where(
            &|r| r.get("ts").and_then(|v| v.as_i64()) == Some(2),
            "a",
            "drop ts=2",
        )
        .unwrap();
        let after = main.snapshot().unwrap();
        assert_eq!(after.len(), 1);
        let object = after.select_all().remove(0);
        assert!(!before.exists(&object.id));
        assert_eq!(object.count, 2);
        assert_eq!((object.min, object.max), (Key::Int(1), Key::Int(3)));

        assert!(matches!(
            main.delete_where(&|_| false, "a", "nothing"),
            Err(LakeError::EmptyTransaction)
        ));
    }

    #[test]
    fn delete_where_removes_replacements_of_lost_attempts() {
        let engine = Arc::new(InMemoryEngine::new());
        let pool = pool_on(engine.clone(), LakeConfig::default());
        let main = pool.open_branch(MAIN_BRANCH).unwrap();
        let other = pool.open_branch(MAIN_BRANCH).unwrap();
        main.load(records(&[1, 2, 3]), "a", "load", Meta::new()).unwrap();
        let original = ids(&main.snapshot().unwrap());

        let raced = std::sync::atomic::AtomicBool::new(false);
        let predicate = |r: &Record| {
            // Another writer moves the branch during the first attempt.
            if !raced.swap(true, std::sync::atomic::Ordering::SeqCst) {
                other.load(records(&[5]), "b", "race", Meta::new()).unwrap();
            }
            r.get("ts").and_then(|v| v.as_i64()) == Some(2)
        };
        let id = main.delete_where(&predicate, "a", "drop ts=2").unwrap();
        assert_eq!(pool.commits().get(id).unwrap().info().retries, 1);

        let tip = main.snapshot().unwrap();
        assert_eq!(tip.len(), 2);
        let mut expected: Vec<String> = ids(&tip)
            .into_iter()
            .chain(original)
            .map(|id| format!("{}/data/{id}.jsonl", pool.id()))
            .collect();
        expected.sort();
        assert_eq!(engine.list(&format!("{}/data/", pool.id())).unwrap(), expected);
    }

    #[test]
    fn compact_merges_objects() {
        let pool = pool();
        let main = pool.open_branch(MAIN_BRANCH).unwrap();
        main.load(records(&[1]), "a", "one", Meta::new()).unwrap();
        main.load(records(&[2]), "a", "two", Meta::new()).unwrap();
        let src = ids(&main.snapshot().unwrap());
        main.compact(&src, "a").unwrap();
        let after = main.snapshot().unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after.select_all()[0].count, 2);
        assert!(matches!(
            main.commit_compact(&src, &[], "a", "m"),
            Err(LakeError::EmptyTransaction)
        ));
    }

    #[test]
    fn vector_flags_follow_objects() {
        let pool = pool();
        let main = pool.open_branch(MAIN_BRANCH).unwrap();
        main.load(records(&[1]), "a", "one", Meta::new()).unwrap();
        let id = ids(&main.snapshot().unwrap())[0];
        main.add_vectors(&[id], "a", "vec").unwrap();
        assert!(main.snapshot().unwrap().has_vector(&id));
        assert!(matches!(
            main.add_vectors(&[id], "a", "vec"),
            Err(LakeError::Commit(CommitError::VectorExists(_)))
        ));
        assert!(matches!(
            main.add_vectors(&[Id::new()], "a", "vec"),
            Err(LakeError::Commit(CommitError::NotFound(_)))
        ));
        main.delete_vectors(&[id], "a", "unvec").unwrap();
        assert!(!main.snapshot().unwrap().has_vector(&id));
    }

    #[test]
    fn merge_brings_child_changes() {
        let pool = pool();
        let main = pool.open_branch(MAIN_BRANCH).unwrap();
        main.load(records(&[1]), "a", "base", Meta::new()).unwrap();
        pool.create_branch("dev", main.tip().unwrap()).unwrap();
        let dev = pool.open_branch("dev").unwrap();

        dev.load(records(&[2]), "a", "dev work", Meta::new()).unwrap();
        main.load(records(&[3]), "a", "main work", Meta::new()).unwrap();

        let merged = dev.merge_into(&main, "a", "merge dev").unwrap();
        let snapshot = pool.snapshot(merged).unwrap();
        assert_eq!(snapshot.len(), 3);
        for id in dev.snapshot().unwrap().ids() {
            assert!(snapshot.exists(id));
        }
        assert_eq!(
            pool.commits().get(merged).unwrap().info().meta.get("merged_from"),
            Some(&"dev".to_string())
        );

        // Nothing new on dev since the merge.
        assert!(matches!(
            dev.merge_into(&main, "a", "again"),
            Err(LakeError::Commit(CommitError::EmptyDiff))
        ));
    }

    #[test]
    fn merge_conflict_on_divergent_vector() {
        let pool = pool();
        let main = pool.open_branch(MAIN_BRANCH).unwrap();
        main.load(records(&[1]), "a", "base", Meta::new()).unwrap();
        let id = ids(&main.snapshot().unwrap())[0];
        pool.create_branch("dev", main.tip().unwrap()).unwrap();
        let dev = pool.open_branch("dev").unwrap();

        main.delete(&[id], "a", "drop").unwrap();
        dev.add_vectors(&[id], "a", "vec").unwrap();

        let err = dev.merge_into(&main, "a", "merge").unwrap_err();
        assert!(err.is_conflict(), "unexpected error: {err}");
    }
}
