use lake_types::{DataObject, Id};
use tracing::debug;

use crate::error::Result;

/// One row: a JSON object.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Outcome of deleting rows by predicate.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RowDeletion {
    /// Objects that held at least one matching row.
    pub deleted: Vec<Id>,
    /// New objects holding the rows of `deleted` that did not match.
    pub replacements: Vec<DataObject>,
    /// Number of rows removed.
    pub rows: u64,
}

impl RowDeletion {
    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty()
    }
}

/// Writes, reads and removes the rows behind data object descriptors.
pub trait DataObjectStore: Send + Sync {
    /// Persist `records` as one or more new objects.
    fn write(&self, records: Vec<Record>) -> Result<Vec<DataObject>>;

    /// Load every row of `object`.
    fn read(&self, object: &DataObject) -> Result<Vec<Record>>;

    /// Remove the rows of object `id`. Returns `false` if nothing was stored.
    fn remove(&self, id: Id) -> Result<bool>;

    /// Rewrite `objects` without the rows matching `predicate`.
    ///
    /// Objects without a matching row are left alone. Replacements are
    /// written before returning; the caller commits them along with the
    /// deletion of the originals.
    fn delete_rows(
        &self,
        objects: &[DataObject],
        predicate: &dyn Fn(&Record) -> bool,
    ) -> Result<RowDeletion> {
        let mut outcome = RowDeletion::default();
        let mut retained = Vec::new();
        for object in objects {
            let rows = self.read(object)?;
            let before = rows.len();
            let kept: Vec<Record> = rows.into_iter().filter(|r| !predicate(r)).collect();
            if kept.len() == before {
                continue;
            }
            outcome.rows += (before - kept.len()) as u64;
            outcome.deleted.push(object.id);
            retained.extend(kept);
        }
        if !retained.is_empty() {
            outcome.replacements = self.write(retained)?;
        }
        debug!(
            scanned = objects.len(),
            deleted = outcome.deleted.len(),
            rows = outcome.rows,
            "deleted rows by predicate"
        );
        Ok(outcome)
    }

    /// Merge the rows of `objects` into freshly written objects.
    fn rewrite(&self, objects: &[DataObject]) -> Result<Vec<DataObject>> {
        let mut rows = Vec::new();
        for object in objects {
            rows.extend(self.read(object)?);
        }
        self.write(rows)
    }
}
