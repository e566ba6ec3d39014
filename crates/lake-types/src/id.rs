use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Time-sortable 128-bit identifier (UUID v7).
///
/// Used for commits, pools and data objects. IDs generated later compare
/// greater than IDs generated earlier (to millisecond precision), so sorting
/// a set of IDs approximates creation order.
///
/// [`Id::nil`] is reserved: as a parent it marks the root of a commit chain,
/// and as a branch tip it marks a branch with no commits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id(uuid::Uuid);

impl Id {
    /// Generate a new time-ordered ID.
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    /// The nil ID (all zeros).
    pub const fn nil() -> Self {
        Self(uuid::Uuid::nil())
    }

    /// Returns `true` if this is the nil ID.
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// Create from an existing UUID.
    pub fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }

    /// Short representation (first 8 hex characters).
    pub fn short_id(&self) -> String {
        self.to_string()[..8].to_string()
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.short_id())
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for Id {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| TypeError::InvalidId(format!("{s}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_ids_are_unique() {
        assert_ne!(Id::new(), Id::new());
    }

    #[test]
    fn ids_sort_by_creation_time() {
        let first = Id::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = Id::new();
        assert!(first < second);
    }

    #[test]
    fn nil_is_smallest() {
        assert!(Id::nil().is_nil());
        assert!(Id::nil() < Id::new());
        assert!(!Id::new().is_nil());
    }

    #[test]
    fn display_parses_back() {
        let id = Id::new();
        let text = id.to_string();
        assert_eq!(text.len(), 32);
        assert_eq!(text.parse::<Id>().unwrap(), id);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!("nope".parse::<Id>(), Err(TypeError::InvalidId(_))));
    }

    #[test]
    fn short_id_is_prefix() {
        let id = Id::new();
        assert!(id.to_string().starts_with(&id.short_id()));
    }
}
