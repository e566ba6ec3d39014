//! A git-like, version-controlled data lake over a plain blob store.
//!
//! A [`Root`] holds pools. Each [`Pool`] is a sorted dataset with its own
//! commit history and named branches. A [`Branch`] is a mutable pointer
//! into that history, moved only by compare-and-swap on the pool's branch
//! journal, so any number of writers can share a branch without locks.
//!
//! ```no_run
//! use std::sync::Arc;
//! use lake_core::{LakeConfig, Root};
//! use lake_storage::InMemoryEngine;
//! use lake_types::{Order, SortKey};
//!
//! let root = Root::create(Arc::new(InMemoryEngine::new()), LakeConfig::default())?;
//! root.create_pool("logs", SortKey::new("ts", Order::Asc), 1 << 20)?;
//! let main = root.open_branch("logs", "main")?;
//! # Ok::<(), lake_core::LakeError>(())
//! ```

pub mod branch;
pub mod config;
pub mod error;
pub mod names;
pub mod pool;
pub mod root;
pub mod version;

pub use branch::Branch;
pub use config::LakeConfig;
pub use error::{LakeError, Result};
pub use pool::{BranchConfig, Pool, PoolConfig, MAIN_BRANCH};
pub use root::Root;
