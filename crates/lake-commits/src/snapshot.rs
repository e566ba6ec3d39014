//! Materialized pool state and the traits shared with [`Patch`].
//!
//! Checkpoint format (stored next to the commit object it checkpoints):
//! ```text
//! [4 bytes: magic "LKSN"]
//! [4 bytes: CRC32 of payload (little-endian u32)]
//! [N bytes: payload (bincode-serialized Vec<Action>, Add/AddVector only)]
//! ```
//!
//! [`Patch`]: crate::patch::Patch

use std::collections::{BTreeMap, BTreeSet};

use lake_types::{DataObject, Id, Order, Span};

use crate::action::Action;
use crate::error::{CommitError, Result};

const MAGIC: &[u8; 4] = b"LKSN";
const HEADER_SIZE: usize = 8;

/// Read access to a pool state.
pub trait View: Send + Sync {
    fn lookup(&self, id: &Id) -> Option<&DataObject>;

    fn exists(&self, id: &Id) -> bool {
        self.lookup(id).is_some()
    }

    fn has_vector(&self, id: &Id) -> bool;

    /// Objects overlapping `span` (all objects when `None`), in pool order.
    fn select(&self, span: Option<&Span>, order: Order) -> Vec<DataObject>;

    fn select_all(&self) -> Vec<DataObject> {
        self.select(None, Order::Asc)
    }
}

/// Write access to a pool state.
pub trait Writeable {
    fn add_data_object(&mut self, object: DataObject) -> Result<()>;
    fn delete_object(&mut self, id: Id) -> Result<()>;
    fn add_vector(&mut self, id: Id) -> Result<()>;
    fn delete_vector(&mut self, id: Id) -> Result<()>;
}

/// Apply one action to a writable state.
pub fn play_action<W: Writeable + ?Sized>(w: &mut W, action: &Action) -> Result<()> {
    match action {
        Action::Add(object) => w.add_data_object(object.clone()),
        Action::Delete(id) => w.delete_object(*id),
        Action::AddVector(id) => w.add_vector(*id),
        Action::DeleteVector(id) => w.delete_vector(*id),
        Action::Commit(_) => Ok(()),
    }
}

/// Sort objects for a read in the given pool order.
pub(crate) fn sort_objects(objects: &mut [DataObject], order: Order) {
    match order {
        Order::Asc => objects.sort_by(|a, b| a.min.cmp(&b.min).then(a.id.cmp(&b.id))),
        Order::Desc => objects.sort_by(|a, b| b.max.cmp(&a.max).then(b.id.cmp(&a.id))),
    }
}

/// The live data objects and vector flags at one commit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    objects: BTreeMap<Id, DataObject>,
    vectors: BTreeSet<Id>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live data objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty() && self.vectors.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &Id> {
        self.objects.keys()
    }

    pub fn objects(&self) -> impl Iterator<Item = &DataObject> {
        self.objects.values()
    }

    pub fn vectors(&self) -> impl Iterator<Item = &Id> {
        self.vectors.iter()
    }

    /// Serialize as a checkpoint.
    pub fn encode_checkpoint(&self) -> Result<Vec<u8>> {
        let actions: Vec<Action> = self
            .objects
            .values()
            .cloned()
            .map(Action::Add)
            .chain(self.vectors.iter().copied().map(Action::AddVector))
            .collect();
        let payload =
            bincode::serialize(&actions).map_err(|e| CommitError::Serialization(e.to_string()))?;
        let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Decode the checkpoint stored for commit `id`.
    pub fn decode_checkpoint(id: Id, bytes: &[u8]) -> Result<Self> {
        let bad = |reason: String| CommitError::BadCheckpoint { id, reason };
        if bytes.len() < HEADER_SIZE || &bytes[..4] != MAGIC {
            return Err(bad("missing checkpoint header".into()));
        }
        let expected = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let payload = &bytes[HEADER_SIZE..];
        if crc32fast::hash(payload) != expected {
            return Err(bad("CRC mismatch".into()));
        }
        let actions: Vec<Action> = bincode::deserialize(payload).map_err(|e| bad(e.to_string()))?;
        let mut snapshot = Snapshot::new();
        for action in &actions {
            match action {
                Action::Add(_) | Action::AddVector(_) => {
                    play_action(&mut snapshot, action).map_err(|e| bad(e.to_string()))?
                }
                Action::Delete(_) | Action::DeleteVector(_) | Action::Commit(_) => {
                    return Err(bad(format!("unexpected action in checkpoint: {action}")))
                }
            }
        }
        Ok(snapshot)
    }
}

impl View for Snapshot {
    fn lookup(&self, id: &Id) -> Option<&DataObject> {
        self.objects.get(id)
    }

    fn has_vector(&self, id: &Id) -> bool {
        self.vectors.contains(id)
    }

    fn select(&self, span: Option<&Span>, order: Order) -> Vec<DataObject> {
        let mut selected: Vec<DataObject> = self
            .objects
            .values()
            .filter(|o| span.map_or(true, |s| o.overlaps(s)))
            .cloned()
            .collect();
        sort_objects(&mut selected, order);
        selected
    }
}

impl Writeable for Snapshot {
    fn add_data_object(&mut self, object: DataObject) -> Result<()> {
        if self.objects.contains_key(&object.id) {
            return Err(CommitError::Exists(object.id));
        }
        self.objects.insert(object.id, object);
        Ok(())
    }

    fn delete_object(&mut self, id: Id) -> Result<()> {
        self.objects
            .remove(&id)
            .map(|_| ())
            .ok_or(CommitError::NotFound(id))
    }

    fn add_vector(&mut self, id: Id) -> Result<()> {
        if !self.vectors.insert(id) {
            return Err(CommitError::VectorExists(id));
        }
        Ok(())
    }

    fn delete_vector(&mut self, id: Id) -> Result<()> {
        if !self.vectors.remove(&id) {
            return Err(CommitError::VectorNotFound(id));
        }
        Ok(())
    }
}
