//! Per-pool commit object storage with snapshot reconstruction.
//!
//! Keys under the pool prefix:
//!
//! ```text
//! <pool>/commits/<id>.commit    encoded CommitObject
//! <pool>/commits/<id>.snap      optional snapshot checkpoint
//! ```
//!
//! All three caches are bounded and advisory: dropping any entry at any time
//! only costs a refetch.

use std::collections::BTreeSet;
use std::sync::Arc;

use crossbeam_channel::{select, Receiver, Sender, TryRecvError};
use lake_storage::{join_key, StorageEngine};
use lake_types::Id;
use quick_cache::sync::Cache;
use tracing::{debug, warn};

use crate::action::Action;
use crate::error::{CommitError, Result};
use crate::object::CommitObject;
use crate::patch::Patch;
use crate::snapshot::{play_action, Snapshot, View, Writeable};

/// Capacities of the commit store caches, in entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    pub objects: usize,
    pub paths: usize,
    pub snapshots: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            objects: 1024,
            paths: 256,
            snapshots: 64,
        }
    }
}

/// Commit objects of one pool, keyed by commit ID.
pub struct CommitStore {
    engine: Arc<dyn StorageEngine>,
    prefix: String,
    objects: Cache<Id, Arc<CommitObject>>,
    paths: Cache<Id, Arc<Vec<Id>>>,
    snapshots: Cache<Id, Arc<Snapshot>>,
}

impl CommitStore {
    /// Open the commit store of the pool stored under `pool_prefix`.
    pub fn new(engine: Arc<dyn StorageEngine>, pool_prefix: &str, cache: CacheConfig) -> Self {
        Self {
            engine,
            prefix: join_key(&[pool_prefix, "commits"]),
            objects: Cache::new(cache.objects.max(1)),
            paths: Cache::new(cache.paths.max(1)),
            snapshots: Cache::new(cache.snapshots.max(1)),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn object_key(&self, id: Id) -> String {
        join_key(&[&self.prefix, &format!("{id}.commit")])
    }

    fn checkpoint_key(&self, id: Id) -> String {
        join_key(&[&self.prefix, &format!("{id}.snap")])
    }

    /// Fetch and decode the commit object `id`.
    pub fn get(&self, id: Id) -> Result<Arc<CommitObject>> {
        if let Some(object) = self.objects.get(&id) {
            return Ok(object);
        }
        let bytes = self
            .engine
            .get(&self.object_key(id))?
            .ok_or(CommitError::CommitNotFound(id))?;
        let object = Arc::new(CommitObject::decode(id, &bytes)?);
        self.objects.insert(id, object.clone());
        Ok(object)
    }

    pub fn exists(&self, id: Id) -> Result<bool> {
        Ok(self.engine.exists(&self.object_key(id))?)
    }

    pub fn put(&self, object: &CommitObject) -> Result<()> {
        let bytes = object.encode()?;
        self.engine.put(&self.object_key(object.commit), &bytes)?;
        debug!(commit = %object.commit, parent = %object.parent, actions = object.len(), "stored commit object");
        Ok(())
    }

    /// Remove a commit object and its checkpoint.
    pub fn remove(&self, id: Id) -> Result<()> {
        self.engine.delete(&self.object_key(id))?;
        self.engine.delete(&self.checkpoint_key(id))?;
        self.objects.remove(&id);
        self.paths.remove(&id);
        self.snapshots.remove(&id);
        debug!(commit = %id, "removed commit object");
        Ok(())
    }

    /// The snapshot cached or checkpointed for `id`, if any.
    fn probe(&self, id: Id) -> Result<Option<Arc<Snapshot>>> {
        if let Some(snapshot) = self.snapshots.get(&id) {
            return Ok(Some(snapshot));
        }
        let Some(bytes) = self.engine.get(&self.checkpoint_key(id))? else {
            return Ok(None);
        };
        let snapshot = Arc::new(Snapshot::decode_checkpoint(id, &bytes)?);
        self.snapshots.insert(id, snapshot.clone());
        Ok(Some(snapshot))
    }

    /// The pool state at commit `leaf`.
    ///
    /// Walks root-ward until a cached or checkpointed snapshot (or the nil
    /// root) is found, then replays the collected commits oldest first.
    pub fn snapshot(&self, leaf: Id) -> Result<Arc<Snapshot>> {
        let mut pending = Vec::new();
        let mut cursor = leaf;
        let mut snapshot = loop {
            if cursor.is_nil() {
                break Snapshot::new();
            }
            if let Some(found) = self.probe(cursor)? {
                if pending.is_empty() {
                    return Ok(found);
                }
                break Snapshot::clone(&found);
            }
            let object = self.get(cursor)?;
            cursor = object.parent;
            pending.push(object);
        };
        if pending.is_empty() {
            return Ok(Arc::new(snapshot));
        }

        let replayed = pending.len();
        for object in pending.iter().rev() {
            replay(&mut snapshot, object)?;
        }
        let snapshot = Arc::new(snapshot);
        self.checkpoint(leaf, &snapshot);
        self.snapshots.insert(leaf, snapshot.clone());
        debug!(commit = %leaf, replayed, objects = snapshot.len(), "reconstructed snapshot");
        Ok(snapshot)
    }

    fn checkpoint(&self, id: Id, snapshot: &Snapshot) {
        let result = snapshot
            .encode_checkpoint()
            .and_then(|bytes| Ok(self.engine.put(&self.checkpoint_key(id), &bytes)?));
        if let Err(e) = result {
            warn!(commit = %id, error = %e, "failed to persist snapshot checkpoint");
        }
    }

    /// Commit IDs from `leaf` back to the first commit, leaf first.
    pub fn path(&self, leaf: Id) -> Result<Arc<Vec<Id>>> {
        if let Some(path) = self.paths.get(&leaf) {
            return Ok(path);
        }
        let mut ids = Vec::new();
        let mut cursor = leaf;
        while !cursor.is_nil() {
            if let Some(rest) = self.paths.get(&cursor) {
                ids.extend(rest.iter().copied());
                break;
            }
            ids.push(cursor);
            cursor = self.get(cursor)?.parent;
        }
        let path = Arc::new(ids);
        self.paths.insert(leaf, path.clone());
        Ok(path)
    }

    /// Commit IDs from `from` back to `to` inclusive. A nil `to` yields the
    /// whole path.
    pub fn path_range(&self, from: Id, to: Id) -> Result<Vec<Id>> {
        let path = self.path(from)?;
        if to.is_nil() {
            return Ok(path.to_vec());
        }
        match path.iter().position(|id| *id == to) {
            Some(end) => Ok(path[..=end].to_vec()),
            None => Err(CommitError::Internal(format!(
                "commit {to} is not an ancestor of {from}"
            ))),
        }
    }

    /// The changes made by commit `id`, over the snapshot of its parent.
    pub fn patch_of_commit(&self, id: Id) -> Result<Patch> {
        let object = self.get(id)?;
        let base: Arc<dyn View> = self.snapshot(object.parent)?;
        let mut patch = Patch::new(base);
        replay(&mut patch, &object)?;
        Ok(patch)
    }

    /// The changes made by every commit after `base_id` up to and including
    /// `commit`, over `base` (the snapshot at `base_id`).
    pub fn patch_of_path(&self, base: Arc<dyn View>, base_id: Id, commit: Id) -> Result<Patch> {
        let mut patch = Patch::new(base);
        if commit == base_id {
            return Ok(patch);
        }
        let mut ids = self.path_range(commit, base_id)?;
        if !base_id.is_nil() && ids.pop() != Some(base_id) {
            return Err(CommitError::Internal(format!(
                "path from {commit} does not end at {base_id}"
            )));
        }
        for id in ids.iter().rev() {
            let object = self.get(*id)?;
            replay(&mut patch, &object)?;
        }
        Ok(patch)
    }

    /// Stream the IDs of data objects added anywhere in the history of
    /// `leaf` (excluding `leaf` itself) that are no longer live at `leaf`.
    ///
    /// A signal or disconnect on `cancel` aborts with
    /// [`CommitError::Canceled`]. A dropped receiver on `out` ends the walk
    /// without error.
    pub fn vacuumable(&self, leaf: Id, out: &Sender<Id>, cancel: &Receiver<()>) -> Result<()> {
        let live = self.snapshot(leaf)?;
        let path = self.path(leaf)?;
        let mut seen = BTreeSet::new();
        let mut emitted = 0usize;
        for id in path.iter().skip(1) {
            match cancel.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => return Err(CommitError::Canceled),
                Err(TryRecvError::Empty) => {}
            }
            let object = self.get(*id)?;
            for action in object.changes() {
                let Action::Add(added) = action else { continue };
                if live.exists(&added.id) || !seen.insert(added.id) {
                    continue;
                }
                select! {
                    send(out, added.id) -> sent => {
                        if sent.is_err() {
                            debug!(leaf = %leaf, emitted, "vacuum consumer went away");
                            return Ok(());
                        }
                        emitted += 1;
                    }
                    recv(cancel) -> _ => return Err(CommitError::Canceled),
                }
            }
        }
        debug!(leaf = %leaf, emitted, "vacuumable walk finished");
        Ok(())
    }

    /// The nearest commit reachable from both `a` and `b`. The nil root is
    /// an ancestor of everything.
    pub fn common_ancestor(&self, a: Id, b: Id) -> Result<Id> {
        let ours: BTreeSet<Id> = self.path(a)?.iter().copied().collect();
        let theirs = self.path(b)?;
        Ok(theirs
            .iter()
            .copied()
            .find(|id| ours.contains(id))
            .unwrap_or_else(Id::nil))
    }
}

fn replay<W: Writeable + ?Sized>(w: &mut W, object: &CommitObject) -> Result<()> {
    for action in object.changes() {
        play_action(w, action).map_err(|e| {
            CommitError::Internal(format!("replaying commit {}: {e}", object.commit))
        })?;
    }
    Ok(())
}

impl std::fmt::Debug for CommitStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}
