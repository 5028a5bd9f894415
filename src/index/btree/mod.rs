//! B-tree index.
//!
//! A classic B-tree (values live in every node, not only leaves) keyed by
//! `u64`. Nodes are objects in an [`ObjectStore`](crate::object::ObjectStore)
//! and refer to their children by object id.
//!
//! # Components
//! - [`BTree`] - Insert, lookup, ordered traversal and delete
//! - [`Node`] / [`Entry`] - The persisted node format

mod node;
mod tree;

pub use node::{Entry, Node};
pub use tree::BTree;
