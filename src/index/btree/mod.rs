//! Disk-resident B+Tree over row ordinals.
//!
//! - [`BTreeNode`] - Lazily paged node with dirty tracking
//! - [`BPlusTree`] - Insert, delete, and condition search over nodes

mod node;
mod tree;

pub use node::{BTreeNode, NODE_RECORD_SIZE};
pub use tree::{BPlusTree, TREE_HEADER_SIZE};
