//! Change sets layered over an immutable base view.
//!
//! A [`Patch`] records what a sequence of actions did to `base` without
//! copying it: additions land in an overlay [`Snapshot`], deletions of base
//! objects are remembered by ID. Patches turn into commit objects, reverts,
//! and merge diffs.

use std::collections::BTreeSet;
use std::sync::Arc;

use lake_types::{DataObject, Id, Order, Span};
use tracing::debug;

use crate::action::{Action, Meta};
use crate::error::{CommitError, Result};
use crate::object::CommitObject;
use crate::snapshot::{sort_objects, Snapshot, View, Writeable};

#[derive(Clone)]
pub struct Patch {
    base: Arc<dyn View>,
    diff: Snapshot,
    deleted_objects: BTreeSet<Id>,
    deleted_vectors: BTreeSet<Id>,
}

impl Patch {
    pub fn new(base: Arc<dyn View>) -> Self {
        Self {
            base,
            diff: Snapshot::new(),
            deleted_objects: BTreeSet::new(),
            deleted_vectors: BTreeSet::new(),
        }
    }

    pub fn base(&self) -> &Arc<dyn View> {
        &self.base
    }

    /// Objects added on top of the base.
    pub fn added_objects(&self) -> impl Iterator<Item = &DataObject> {
        self.diff.objects()
    }

    /// Base objects this patch deletes.
    pub fn deleted_objects(&self) -> impl Iterator<Item = &Id> {
        self.deleted_objects.iter()
    }

    pub fn added_vectors(&self) -> impl Iterator<Item = &Id> {
        self.diff.vectors()
    }

    pub fn deleted_vectors(&self) -> impl Iterator<Item = &Id> {
        self.deleted_vectors.iter()
    }

    /// Returns `true` if the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.diff.is_empty() && self.deleted_objects.is_empty() && self.deleted_vectors.is_empty()
    }

    /// Turn the patch into a commit object on top of `parent`.
    ///
    /// Actions follow the header in a fixed order: deletes, adds, vector
    /// deletes, vector adds.
    pub fn new_commit_object(
        &self,
        parent: Id,
        retries: u32,
        author: &str,
        message: &str,
        meta: Meta,
    ) -> CommitObject {
        let mut object = CommitObject::new(parent, author, message, meta, retries);
        for id in &self.deleted_objects {
            object.append(Action::Delete(*id));
        }
        for added in self.diff.objects() {
            object.append(Action::Add(added.clone()));
        }
        for id in &self.deleted_vectors {
            object.append(Action::DeleteVector(*id));
        }
        for id in self.diff.vectors() {
            object.append(Action::AddVector(*id));
        }
        object
    }

    /// Build the commit that undoes this patch against the current `tip`.
    ///
    /// Only changes still visible in `tip` are undone: objects the patch
    /// added and that survive are deleted, base objects the patch deleted
    /// and that are still gone are re-added. Vector flags likewise; a flag
    /// comes back if its object is in `tip` or re-added by this revert.
    pub fn revert(
        &self,
        tip: &dyn View,
        commit_id: Id,
        parent: Id,
        retries: u32,
        author: &str,
        message: &str,
    ) -> Result<CommitObject> {
        let mut object = CommitObject::new(parent, author, message, Meta::new(), retries);
        let mut changed = false;
        for added in self.diff.objects() {
            if tip.exists(&added.id) {
                object.append(Action::Delete(added.id));
                changed = true;
            }
        }
        let mut restored = BTreeSet::new();
        for id in &self.deleted_objects {
            if tip.exists(id) {
                continue;
            }
            let deleted = self.base.lookup(id).ok_or_else(|| {
                CommitError::Internal(format!("deleted object {id} missing from patch base"))
            })?;
            object.append(Action::Add(deleted.clone()));
            restored.insert(*id);
            changed = true;
        }
        for id in self.diff.vectors() {
            if tip.has_vector(id) {
                object.append(Action::DeleteVector(*id));
                changed = true;
            }
        }
        for id in &self.deleted_vectors {
            if !tip.has_vector(id) && (tip.exists(id) || restored.contains(id)) {
                object.append(Action::AddVector(*id));
                changed = true;
            }
        }
        if !changed {
            return Err(CommitError::EmptyRevert);
        }
        debug!(reverted = %commit_id, parent = %parent, actions = object.len(), "built revert commit");
        Ok(object)
    }
}

impl View for Patch {
    fn lookup(&self, id: &Id) -> Option<&DataObject> {
        if let Some(object) = self.diff.lookup(id) {
            return Some(object);
        }
        if self.deleted_objects.contains(id) {
            return None;
        }
        self.base.lookup(id)
    }

    fn has_vector(&self, id: &Id) -> bool {
        self.diff.has_vector(id) || (!self.deleted_vectors.contains(id) && self.base.has_vector(id))
    }

    fn select(&self, span: Option<&Span>, order: Order) -> Vec<DataObject> {
        let mut selected: Vec<DataObject> = self
            .base
            .select(span, order)
            .into_iter()
            .filter(|o| !self.deleted_objects.contains(&o.id))
            .collect();
        selected.extend(self.diff.select(span, order));
        sort_objects(&mut selected, order);
        selected
    }
}

impl Writeable for Patch {
    fn add_data_object(&mut self, object: DataObject) -> Result<()> {
        if self.exists(&object.id) {
            return Err(CommitError::Exists(object.id));
        }
        if self.deleted_objects.remove(&object.id) {
            return Ok(());
        }
        self.diff.add_data_object(object)
    }

    fn delete_object(&mut self, id: Id) -> Result<()> {
        if self.diff.exists(&id) {
            return self.diff.delete_object(id);
        }
        if self.base.exists(&id) && self.deleted_objects.insert(id) {
            return Ok(());
        }
        Err(CommitError::NotFound(id))
    }

    fn add_vector(&mut self, id: Id) -> Result<()> {
        if self.has_vector(&id) {
            return Err(CommitError::VectorExists(id));
        }
        if self.deleted_vectors.remove(&id) {
            return Ok(());
        }
        self.diff.add_vector(id)
    }

    fn delete_vector(&mut self, id: Id) -> Result<()> {
        if self.diff.has_vector(&id) {
            return self.diff.delete_vector(id);
        }
        if self.base.has_vector(&id) && self.deleted_vectors.insert(id) {
            return Ok(());
        }
        Err(CommitError::VectorNotFound(id))
    }
}

impl std::fmt::Debug for Patch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Patch")
            .field("diff", &self.diff)
            .field("deleted_objects", &self.deleted_objects)
            .field("deleted_vectors", &self.deleted_vectors)
            .finish_non_exhaustive()
    }
}

/// Everything `child` changed that `parent` does not already reflect, as a
/// patch on top of `parent`.
///
/// Both patches must share the same base, typically the snapshot of the
/// common ancestor of two branches.
pub fn diff(parent: Patch, child: &Patch) -> Result<Patch> {
    let parent = Arc::new(parent);
    let mut out = Patch::new(parent.clone());

    for added in child.diff.objects() {
        if parent.exists(&added.id) {
            continue;
        }
        // Only reachable when the two patches sit on different bases.
        if parent.deleted_objects.contains(&added.id) {
            return Err(CommitError::Conflict(format!(
                "object {} added in child but deleted in parent",
                added.id
            )));
        }
        out.add_data_object(added.clone())?;
    }

    for id in &child.deleted_objects {
        if parent.exists(id) {
            out.delete_object(*id)?;
        } else if !parent.deleted_objects.contains(id) {
            return Err(CommitError::Conflict(format!(
                "object {id} deleted in child is not present in parent"
            )));
        }
    }

    for id in child.diff.vectors() {
        if parent.has_vector(id) {
            continue;
        }
        if parent.deleted_vectors.contains(id) || !out.exists(id) {
            return Err(CommitError::Conflict(format!(
                "vector for object {id} added in child but object not present in parent"
            )));
        }
        out.add_vector(*id)?;
    }

    for id in &child.deleted_vectors {
        if parent.has_vector(id) {
            out.delete_vector(*id)?;
        } else if !parent.deleted_vectors.contains(id) {
            return Err(CommitError::Conflict(format!(
                "vector for object {id} deleted in child is not present in parent"
            )));
        }
    }

    if out.is_empty() {
        return Err(CommitError::EmptyDiff);
    }
    Ok(out)
}
