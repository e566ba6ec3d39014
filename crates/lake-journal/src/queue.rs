//! Position-addressed append-only log.
//!
//! Layout under `prefix`:
//!
//! ```text
//! <prefix>/HEAD          best-effort hint of the last committed position
//! <prefix>/1.json        first entry
//! <prefix>/2.json        ...
//! ```
//!
//! The hint may lag behind the real head (it is written after the entry), so
//! [`Queue::head`] probes forward from it until it finds a gap.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lake_storage::{join_key, StorageEngine, StoreError};
use tracing::{debug, warn};

use crate::error::{JournalError, Result};

/// Outcome of an append at a fixed position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Append {
    /// The entry now occupies the position.
    Committed,
    /// Another writer got there first.
    PositionTaken,
}

/// Append-only, position-addressed sequence of opaque entries.
pub struct Queue {
    engine: Arc<dyn StorageEngine>,
    prefix: String,
    warned_fallback: AtomicBool,
}

impl Queue {
    pub fn new(engine: Arc<dyn StorageEngine>, prefix: impl Into<String>) -> Self {
        Self {
            engine,
            prefix: prefix.into(),
            warned_fallback: AtomicBool::new(false),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn entry_key(&self, position: u64) -> String {
        join_key(&[&self.prefix, &format!("{position}.json")])
    }

    fn head_key(&self) -> String {
        join_key(&[&self.prefix, "HEAD"])
    }

    /// The position of the last committed entry, or 0 for an empty queue.
    pub fn head(&self) -> Result<u64> {
        let mut position = match self.engine.get(&self.head_key())? {
            Some(bytes) => String::from_utf8_lossy(&bytes).trim().parse().unwrap_or(0),
            None => 0,
        };
        while self.engine.exists(&self.entry_key(position + 1))? {
            position += 1;
        }
        Ok(position)
    }

    /// Load the entry at `position`. A missing entry below the head is
    /// corruption.
    pub fn load(&self, position: u64) -> Result<Vec<u8>> {
        self.engine
            .get(&self.entry_key(position))?
            .ok_or_else(|| JournalError::Corrupt {
                position,
                reason: "entry missing".into(),
            })
    }

    /// Append `data` at exactly `position`.
    ///
    /// Uses the engine's conditional create. When the engine does not
    /// support it, falls back to checking for the entry and then writing it
    /// unconditionally; two writers racing inside that window can both
    /// believe they won.
    pub fn commit_at(&self, position: u64, data: &[u8]) -> Result<Append> {
        let key = self.entry_key(position);
        match self.engine.put_if_not_exists(&key, data) {
            Ok(()) => {}
            Err(StoreError::AlreadyExists(_)) => return Ok(Append::PositionTaken),
            Err(StoreError::Unsupported(_)) => {
                if !self.warned_fallback.swap(true, Ordering::Relaxed) {
                    warn!(
                        prefix = %self.prefix,
                        "storage engine lacks conditional create; journal appends may race"
                    );
                }
                if self.engine.exists(&key)? {
                    return Ok(Append::PositionTaken);
                }
                self.engine.put(&key, data)?;
            }
            Err(e) => return Err(e.into()),
        }
        if let Err(e) = self.engine.put(&self.head_key(), position.to_string().as_bytes()) {
            warn!(prefix = %self.prefix, position, error = %e, "failed to update journal head hint");
        }
        debug!(prefix = %self.prefix, position, len = data.len(), "journal append");
        Ok(Append::Committed)
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue").field("prefix", &self.prefix).finish()
    }
}
