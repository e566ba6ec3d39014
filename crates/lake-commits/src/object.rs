//! Commit objects and their wire format.
//!
//! On-storage format:
//! ```text
//! [4 bytes: magic "LKCO"]
//! [4 bytes: CRC32 of payload (little-endian u32)]
//! [N bytes: payload (bincode-serialized Vec<Action>)]
//! ```
//! Record 0 of the payload is always the [`Action::Commit`] header.

use chrono::Utc;

use lake_types::Id;

use crate::action::{Action, CommitInfo, Meta};
use crate::error::{CommitError, Result};

const MAGIC: &[u8; 4] = b"LKCO";
const HEADER_SIZE: usize = 8;

/// An immutable record of one atomic change to a pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitObject {
    pub commit: Id,
    pub parent: Id,
    actions: Vec<Action>,
}

impl CommitObject {
    /// Start a new commit with a fresh ID on top of `parent`.
    pub fn new(parent: Id, author: &str, message: &str, meta: Meta, retries: u32) -> Self {
        Self::with_id(Id::new(), parent, author, message, meta, retries)
    }

    /// Start a commit with a caller-chosen ID.
    pub fn with_id(
        commit: Id,
        parent: Id,
        author: &str,
        message: &str,
        meta: Meta,
        retries: u32,
    ) -> Self {
        let info = CommitInfo {
            id: commit,
            parent,
            author: author.to_string(),
            date: Utc::now(),
            message: message.to_string(),
            meta,
            retries,
        };
        Self {
            commit,
            parent,
            actions: vec![Action::Commit(info)],
        }
    }

    pub fn append(&mut self, action: Action) {
        self.actions.push(action);
    }

    /// All actions, header first.
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// The actions after the header.
    pub fn changes(&self) -> &[Action] {
        &self.actions[1..]
    }

    /// The commit header.
    pub fn info(&self) -> &CommitInfo {
        match self.actions.first() {
            Some(Action::Commit(info)) => info,
            // Record 0 is fixed by every constructor and checked by the decoder.
            _ => unreachable!("commit object without commit header"),
        }
    }

    /// Number of non-header actions.
    pub fn len(&self) -> usize {
        self.actions.len() - 1
    }

    /// Returns `true` if the commit changes nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = bincode::serialize(&self.actions)
            .map_err(|e| CommitError::Serialization(e.to_string()))?;
        let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Decode the object stored under `id`.
    pub fn decode(id: Id, bytes: &[u8]) -> Result<Self> {
        let bad = |reason: String| CommitError::BadCommitObject { id, reason };
        if bytes.len() < HEADER_SIZE || &bytes[..4] != MAGIC {
            return Err(bad("missing commit object header".into()));
        }
        let expected = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let payload = &bytes[HEADER_SIZE..];
        let actual = crc32fast::hash(payload);
        if actual != expected {
            return Err(bad(format!(
                "CRC mismatch: expected {expected:#010x}, got {actual:#010x}"
            )));
        }
        let actions: Vec<Action> = bincode::deserialize(payload).map_err(|e| bad(e.to_string()))?;
        let (commit, parent) = match actions.first() {
            Some(Action::Commit(info)) => (info.id, info.parent),
            _ => return Err(bad("first record is not a commit action".into())),
        };
        if commit != id {
            return Err(bad(format!("header names commit {commit}")));
        }
        Ok(Self {
            commit,
            parent,
            actions,
        })
    }
}
