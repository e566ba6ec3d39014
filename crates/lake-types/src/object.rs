use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::Id;
use crate::key::{Key, Span};

/// Immutable descriptor of a physically stored data object.
///
/// The rows themselves live in storage, written by a data-object writer.
/// The commit history only ever carries this descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataObject {
    pub id: Id,
    /// Smallest sort key of any row in the object.
    pub min: Key,
    /// Largest sort key of any row in the object.
    pub max: Key,
    /// Number of rows.
    pub count: u64,
    /// Stored size in bytes.
    pub size: u64,
}

impl DataObject {
    pub fn new(id: Id, min: Key, max: Key, count: u64, size: u64) -> Self {
        Self {
            id,
            min,
            max,
            count,
            size,
        }
    }

    /// The key range covered by this object.
    pub fn span(&self) -> Span {
        Span::new(self.min.clone(), self.max.clone())
    }

    /// Returns `true` if this object may hold rows within `span`.
    pub fn overlaps(&self, span: &Span) -> bool {
        span.overlaps(&self.min, &self.max)
    }
}

impl fmt::Display for DataObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}..{}] count={} size={}",
            self.id, self.min, self.max, self.count, self.size
        )
    }
}
