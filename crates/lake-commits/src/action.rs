use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lake_types::{DataObject, Id};

/// Application metadata attached to a commit.
pub type Meta = BTreeMap<String, String>;

/// Header of a commit: who, when, why, and on top of what.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub id: Id,
    /// The commit this one was built on; nil for the first commit.
    pub parent: Id,
    pub author: String,
    pub date: DateTime<Utc>,
    pub message: String,
    pub meta: Meta,
    /// How many times the writer lost the branch race before this commit
    /// landed.
    pub retries: u32,
}

/// One step of a commit.
///
/// Replay matches on this enum exhaustively; a new variant is a compile
/// error everywhere history is interpreted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Add(DataObject),
    Delete(Id),
    AddVector(Id),
    DeleteVector(Id),
    Commit(CommitInfo),
}

impl Action {
    /// The data object or commit this action refers to.
    pub fn target(&self) -> Id {
        match self {
            Action::Add(object) => object.id,
            Action::Delete(id) | Action::AddVector(id) | Action::DeleteVector(id) => *id,
            Action::Commit(info) => info.id,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Add(object) => write!(f, "ADD {object}"),
            Action::Delete(id) => write!(f, "DEL {id}"),
            Action::AddVector(id) => write!(f, "ADD_VECTOR {id}"),
            Action::DeleteVector(id) => write!(f, "DEL_VECTOR {id}"),
            Action::Commit(info) => write!(
                f,
                "COMMIT {} parent {} by {} at {}: {}",
                info.id, info.parent, info.author, info.date, info.message
            ),
        }
    }
}
