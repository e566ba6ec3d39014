//! Foundation types for the lakehouse.
//!
//! Every other lake crate depends on `lake-types`.
//!
//! # Key Types
//!
//! - [`Id`] -- Time-sortable 128-bit identifier for commits, pools and data objects
//! - [`Key`] -- Totally ordered sort-key value
//! - [`Span`] -- Inclusive key range used to plan reads
//! - [`Order`] / [`SortKey`] -- Pool sort configuration
//! - [`DataObject`] -- Immutable descriptor of a physically stored object

pub mod error;
pub mod id;
pub mod key;
pub mod object;

pub use error::TypeError;
pub use id::Id;
pub use key::{Key, Order, SortKey, Span};
pub use object::DataObject;
