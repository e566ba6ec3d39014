//! Physical data objects of the lakehouse.
//!
//! The commit history only carries [`DataObject`](lake_types::DataObject)
//! descriptors. This crate owns the rows behind them: the
//! [`DataObjectStore`] contract for writing, reading and removing objects,
//! and [`RowStore`], which keeps each object as a JSON-lines blob sorted by
//! the pool key.

pub mod error;
pub mod rows;
pub mod traits;

pub use error::{DataError, Result};
pub use rows::RowStore;
pub use traits::{DataObjectStore, Record, RowDeletion};
