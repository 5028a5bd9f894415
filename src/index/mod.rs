//! Index structures.
//!
//! - [`btree`] - Persistent B-tree over the object store

pub mod btree;

pub use btree::BTree;
