//! Append-only journal for the lakehouse.
//!
//! The lake keeps every mutable name -- branch tips, the pool registry -- in a
//! journal: a sequence of entries stored at consecutive positions on a plain
//! storage engine. A writer appends at `head + 1` with a conditional create,
//! so two writers that read the same head can never both append. That single
//! primitive is what makes branch moves atomic.
//!
//! - [`Queue`] -- raw position-addressed append/load
//! - [`Store`] -- keyed table replayed from `Add`/`Update`/`Delete` entries,
//!   with constraint-checked updates

pub mod error;
pub mod queue;
pub mod store;

pub use error::{JournalError, Result};
pub use queue::{Append, Queue};
pub use store::{Entry, JournalConfig, Keyed, Store};
