//! Index layer - ordering of row ordinals by column values.
//!
//! - [`Comparator`] - Orders rows by the bytes of a list of columns
//! - [`btree`] - Disk-resident B+Tree over row ordinals
//! - [`Index`] - Named, persisted tree bound to table columns

pub mod btree;
mod comparator;
#[allow(clippy::module_inception)]
mod index;

pub use btree::{BPlusTree, BTreeNode};
pub use comparator::{compare_bytes, Comparator, EncodedKey};
pub use index::Index;
