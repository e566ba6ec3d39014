//! Blob storage engine contract for the lakehouse.
//!
//! Everything the lake persists -- journal entries, commit objects,
//! snapshot checkpoints, data objects, the version marker -- is an opaque
//! blob stored under a slash-separated key. The lake never needs more than
//! the operations of [`StorageEngine`].
//!
//! # Engines
//!
//! - [`InMemoryEngine`] -- `BTreeMap`-based engine for tests and embedding
//! - [`FileEngine`] -- one file per key under a root directory
//!
//! # Conditional create
//!
//! [`StorageEngine::put_if_not_exists`] is the single serialization point of
//! the whole lake: journal appends race on it. Engines that cannot offer it
//! return [`StoreError::Unsupported`] and callers fall back to a weaker
//! check-then-put.

pub mod error;
pub mod file;
pub mod memory;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use file::FileEngine;
pub use memory::InMemoryEngine;
pub use traits::{join_key, StorageEngine};
