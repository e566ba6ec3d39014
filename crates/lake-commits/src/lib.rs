//! Commit history for the lakehouse.
//!
//! A pool's history is a chain of immutable [`CommitObject`]s, each an
//! ordered list of [`Action`]s. The state of the pool at any commit is a
//! [`Snapshot`] obtained by replaying actions from the root (or from the
//! nearest persisted checkpoint). Pending changes are staged as a [`Patch`]
//! over an immutable base view; patches can be turned into commit objects,
//! reverted, and diffed against each other for merges.
//!
//! # Modules
//!
//! - [`action`] -- the [`Action`] sum type and commit metadata
//! - [`object`] -- [`CommitObject`] and its wire format
//! - [`snapshot`] -- [`View`]/[`Writeable`] traits, [`Snapshot`], checkpoints
//! - [`patch`] -- [`Patch`] and [`diff`]
//! - [`store`] -- the per-pool [`CommitStore`] with its caches

pub mod action;
pub mod error;
pub mod object;
pub mod patch;
pub mod snapshot;
pub mod store;

pub use action::{Action, CommitInfo, Meta};
pub use error::{CommitError, Result};
pub use object::CommitObject;
pub use patch::{diff, Patch};
pub use snapshot::{play_action, Snapshot, View, Writeable};
pub use store::{CacheConfig, CommitStore};
