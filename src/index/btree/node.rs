//! B-tree node layout.

use serde::{Deserialize, Serialize};

use crate::common::ObjectId;

/// A key and its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry<V> {
    pub key: u64,
    pub value: V,
}

/// One node of a [`BTree`](super::BTree).
///
/// A node with no children is a leaf. An internal node with `n` entries
/// has `n + 1` children; child `i` holds keys below `entries[i].key` and
/// child `i + 1` keys above it. Internal entries carry values too.
///
/// Children are referenced by object id, never by pointer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node<V> {
    pub(super) id: ObjectId,
    pub(super) entries: Vec<Entry<V>>,
    pub(super) children: Vec<ObjectId>,
}

impl<V> Node<V> {
    pub(super) fn leaf(id: ObjectId) -> Self {
        Self {
            id,
            entries: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Entry<V>] {
        &self.entries
    }

    pub fn keys(&self) -> Vec<u64> {
        self.entries.iter().map(|entry| entry.key).collect()
    }

    pub fn children(&self) -> &[ObjectId] {
        &self.children
    }

    /// `Ok(i)` if `key` is entry `i`, otherwise `Err(i)` where `i` is both
    /// the insert position and the child to descend into.
    pub fn search(&self, key: u64) -> Result<usize, usize> {
        self.entries.binary_search_by_key(&key, |entry| entry.key)
    }

    pub fn get(&self, key: u64) -> Option<&V> {
        self.search(key).ok().map(|i| &self.entries[i].value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(keys: &[u64]) -> Node<()> {
        let mut node = Node::leaf(ObjectId::new(1));
        node.entries = keys.iter().map(|&key| Entry { key, value: () }).collect();
        node
    }

    #[test]
    fn test_search_positions() {
        let node = node(&[10, 20, 30]);
        assert_eq!(node.search(20), Ok(1));
        assert_eq!(node.search(5), Err(0));
        assert_eq!(node.search(15), Err(1));
        assert_eq!(node.search(35), Err(3));
    }

    #[test]
    fn test_leaf_and_keys() {
        let mut n = node(&[1, 2]);
        assert!(n.is_leaf());
        assert_eq!(n.keys(), vec![1, 2]);
        n.children = vec![ObjectId::new(2), ObjectId::new(3), ObjectId::new(4)];
        assert!(!n.is_leaf());
        assert_eq!(n.get(2), Some(&()));
        assert_eq!(n.get(3), None);
    }
}
