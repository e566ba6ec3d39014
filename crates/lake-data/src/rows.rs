//! Row-oriented data objects.
//!
//! Each object is a JSON-lines blob at `<pool>/data/<id>.jsonl`, rows
//! sorted by the pool key in pool order.

use std::cmp::Ordering;
use std::sync::Arc;

use lake_storage::{join_key, StorageEngine};
use lake_types::{DataObject, Id, Key, Order, SortKey};
use tracing::debug;

use crate::error::{DataError, Result};
use crate::traits::{DataObjectStore, Record};

pub struct RowStore {
    engine: Arc<dyn StorageEngine>,
    prefix: String,
    sort_key: SortKey,
    threshold: u64,
}

impl RowStore {
    /// Objects are cut once their serialized size reaches `threshold` bytes.
    pub fn new(
        engine: Arc<dyn StorageEngine>,
        pool_prefix: &str,
        sort_key: SortKey,
        threshold: u64,
    ) -> Self {
        Self {
            engine,
            prefix: join_key(&[pool_prefix, "data"]),
            sort_key,
            threshold: threshold.max(1),
        }
    }

    pub fn sort_key(&self) -> &SortKey {
        &self.sort_key
    }

    fn object_key(&self, id: Id) -> String {
        join_key(&[&self.prefix, &format!("{id}.jsonl")])
    }

    fn flush(&self, rows: &[(Key, Record)], buf: &[u8]) -> Result<DataObject> {
        let id = Id::new();
        let min = rows.iter().map(|(k, _)| k).min().cloned().unwrap_or(Key::Null);
        let max = rows.iter().map(|(k, _)| k).max().cloned().unwrap_or(Key::Null);
        self.engine.put(&self.object_key(id), buf)?;
        let object = DataObject::new(id, min, max, rows.len() as u64, buf.len() as u64);
        debug!(object = %object, "wrote data object");
        Ok(object)
    }
}

impl DataObjectStore for RowStore {
    fn write(&self, records: Vec<Record>) -> Result<Vec<DataObject>> {
        let mut rows: Vec<(Key, Record)> = records
            .into_iter()
            .map(|r| (self.sort_key.key_of(&r), r))
            .collect();
        let order = self.sort_key.order;
        rows.sort_by(|a, b| match order {
            Order::Asc => a.0.cmp(&b.0),
            Order::Desc => b.0.cmp(&a.0),
        });

        let mut objects = Vec::new();
        let mut start = 0;
        let mut buf = Vec::new();
        for (i, (_, record)) in rows.iter().enumerate() {
            serde_json::to_writer(&mut buf, record)
                .map_err(|e| DataError::Serialization(e.to_string()))?;
            buf.push(b'\n');
            let cut = buf.len() as u64 >= self.threshold
                // Equal keys never straddle two objects.
                && rows.get(i + 1).map_or(true, |next| next.0.cmp(&rows[i].0) != Ordering::Equal);
            if cut {
                objects.push(self.flush(&rows[start..=i], &buf)?);
                buf.clear();
                start = i + 1;
            }
        }
        if start < rows.len() {
            objects.push(self.flush(&rows[start..], &buf)?);
        }
        Ok(objects)
    }

    fn read(&self, object: &DataObject) -> Result<Vec<Record>> {
        let bytes = self
            .engine
            .get(&self.object_key(object.id))?
            .ok_or(DataError::NotFound(object.id))?;
        let text = std::str::from_utf8(&bytes).map_err(|e| DataError::Corrupt {
            id: object.id,
            reason: e.to_string(),
        })?;
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .enumerate()
            .map(|(n, line)| {
                serde_json::from_str::<Record>(line).map_err(|e| DataError::Corrupt {
                    id: object.id,
                    reason: format!("row {n}: {e}"),
                })
            })
            .collect()
    }

    fn remove(&self, id: Id) -> Result<bool> {
        let removed = self.engine.delete(&self.object_key(id))?;
        if removed {
            debug!(object = %id, "removed data object");
        }
        Ok(removed)
    }
}

impl std::fmt::Debug for RowStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowStore")
            .field("prefix", &self.prefix)
            .field("sort_key", &self.sort_key)
            .field("threshold", &self.threshold)
            .finish()
    }
}
