//! Persistent B-tree over the object store.

use std::collections::{BTreeSet, HashMap};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::common::config::MIN_BTREE_ORDER;
use crate::common::{Error, ObjectId, Result};
use crate::object::ObjectStore;

use super::node::{Entry, Node};

/// Persisted description of a tree. Its object id is the tree's id.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct TreeHeader {
    order: u64,
    root: ObjectId,
    len: u64,
}

/// An ordered map from `u64` keys to values, stored as nodes in an
/// [`ObjectStore`].
///
/// # Structure
/// ```text
///                 ┌──────────┐
///                 │    4     │            root
///                 └──────────┘
///               ╱              ╲
///        ┌──────────┐      ┌──────────┐
///        │    2     │      │    6     │
///        └──────────┘      └──────────┘
///        ╱        ╲        ╱        ╲
///     ┌───┐     ┌───┐   ┌───┐     ┌───┐
///     │ 1 │     │ 3 │   │ 5 │     │ 7 │     leaves
///     └───┘     └───┘   └───┘     └───┘
/// ```
///
/// Nodes hold at most `order - 1` keys; every node but the root holds at
/// least `⌈order/2⌉ - 1`. A node that reaches `order` keys splits around
/// its middle key, which moves up to the parent.
///
/// # Working set
/// Nodes changed since the last [`save`](Self::save) live in an arena
/// keyed by object id; every other node is read from the store on
/// demand. After a store rollback the tree must be reopened.
///
/// # Example
/// ```no_run
/// use stardb::{BTree, Store, StoreConfig, FilePersistenceManager};
/// use uuid::Uuid;
///
/// let pm = FilePersistenceManager::new();
/// let mut store = Store::create(&pm, "/tmp/triples", StoreConfig::default()).unwrap();
///
/// let mut tree: BTree<String> = BTree::create(store.objects_mut(), 64).unwrap();
/// tree.insert(store.objects_mut(), 42, "answer".into()).unwrap();
/// tree.save(store.objects_mut()).unwrap();
/// store.commit(Uuid::new_v4()).unwrap();
///
/// assert_eq!(tree.get(store.objects(), 42).unwrap().as_deref(), Some("answer"));
/// ```
pub struct BTree<V> {
    id: ObjectId,
    order: usize,
    root: ObjectId,
    len: u64,
    nodes: HashMap<ObjectId, Node<V>>,
    freed: BTreeSet<ObjectId>,
    header_dirty: bool,
}

impl<V> BTree<V>
where
    V: Clone + Serialize + DeserializeOwned,
{
    /// Create an empty tree. Nothing is written until [`save`](Self::save).
    ///
    /// # Errors
    /// Returns `Error::Config` if `order` is below 3.
    pub fn create(store: &mut ObjectStore, order: usize) -> Result<Self> {
        if order < MIN_BTREE_ORDER {
            return Err(Error::Config(format!(
                "btree order {} must be >= {}",
                order, MIN_BTREE_ORDER
            )));
        }
        let id = store.allocate_id()?;
        let root = store.allocate_id()?;

        let mut tree = Self {
            id,
            order,
            root,
            len: 0,
            nodes: HashMap::new(),
            freed: BTreeSet::new(),
            header_dirty: true,
        };
        tree.put(Node::leaf(root));
        tracing::debug!(tree = id.0, order, "created btree");
        Ok(tree)
    }

    /// Open a saved tree by its id.
    ///
    /// # Errors
    /// Returns `Error::Corruption` if the saved order is below 3.
    pub fn open(store: &ObjectStore, id: ObjectId) -> Result<Self> {
        let header: TreeHeader = store.load_object(id)?;
        if (header.order as usize) < MIN_BTREE_ORDER {
            return Err(Error::corruption(format!(
                "{} has btree order {}, below {}",
                id, header.order, MIN_BTREE_ORDER
            )));
        }
        Ok(Self {
            id,
            order: header.order as usize,
            root: header.root,
            len: header.len,
            nodes: HashMap::new(),
            freed: BTreeSet::new(),
            header_dirty: false,
        })
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn root(&self) -> ObjectId {
        self.root
    }

    /// Number of keys.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn min_keys(&self) -> usize {
        self.order.div_ceil(2) - 1
    }

    // ========================================================================
    // Node access
    // ========================================================================

    /// Resolve a node through the working set or the object store.
    pub fn load_node(&self, store: &ObjectStore, id: ObjectId) -> Result<Node<V>> {
        if let Some(node) = self.nodes.get(&id) {
            return Ok(node.clone());
        }
        let node: Node<V> = store.load_object(id)?;
        if node.id != id {
            return Err(Error::corruption(format!(
                "{} holds the node of {}",
                id, node.id
            )));
        }
        Ok(node)
    }

    /// Take a node out for modification; [`put`](Self::put) returns it.
    fn take(&mut self, store: &ObjectStore, id: ObjectId) -> Result<Node<V>> {
        match self.nodes.remove(&id) {
            Some(node) => Ok(node),
            None => self.load_node(store, id),
        }
    }

    fn put(&mut self, node: Node<V>) {
        self.nodes.insert(node.id, node);
    }

    fn free(&mut self, id: ObjectId) {
        self.nodes.remove(&id);
        self.freed.insert(id);
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// The node that holds `key`, or `None` if the key is absent.
    ///
    /// The search stops at the first node containing the key, which may
    /// be an internal node.
    pub fn lookup(&self, store: &ObjectStore, key: u64) -> Result<Option<Node<V>>> {
        let mut id = self.root;
        loop {
            let node = self.load_node(store, id)?;
            match node.search(key) {
                Ok(_) => return Ok(Some(node)),
                Err(_) if node.is_leaf() => return Ok(None),
                Err(i) => id = node.children[i],
            }
        }
    }

    pub fn get(&self, store: &ObjectStore, key: u64) -> Result<Option<V>> {
        Ok(self
            .lookup(store, key)?
            .and_then(|node| node.get(key).cloned()))
    }

    pub fn contains_key(&self, store: &ObjectStore, key: u64) -> Result<bool> {
        Ok(self.lookup(store, key)?.is_some())
    }

    // ========================================================================
    // Insert
    // ========================================================================

    /// Insert a new key.
    ///
    /// # Errors
    /// Returns `Error::DuplicateKey` if the key is present; the tree is
    /// left untouched.
    pub fn insert(&mut self, store: &mut ObjectStore, key: u64, value: V) -> Result<()> {
        // Parents of the leaf, with the child index taken at each.
        let mut path: Vec<(ObjectId, usize)> = Vec::new();
        let mut id = self.root;
        let position = loop {
            let node = self.load_node(store, id)?;
            match node.search(key) {
                Ok(_) => return Err(Error::DuplicateKey(key)),
                Err(i) if node.is_leaf() => break i,
                Err(i) => {
                    path.push((id, i));
                    id = node.children[i];
                }
            }
        };

        let mut node = self.take(store, id)?;
        node.entries.insert(position, Entry { key, value });

        while node.entries.len() >= self.order {
            let (median, right) = self.split(store, &mut node)?;
            let right_id = right.id;
            let left_id = node.id;
            self.put(node);
            self.put(right);

            match path.pop() {
                Some((parent_id, index)) => {
                    let mut parent = self.take(store, parent_id)?;
                    parent.entries.insert(index, median);
                    parent.children.insert(index + 1, right_id);
                    node = parent;
                }
                None => {
                    let root_id = store.allocate_id()?;
                    node = Node {
                        id: root_id,
                        entries: vec![median],
                        children: vec![left_id, right_id],
                    };
                    self.root = root_id;
                    tracing::trace!(tree = self.id.0, root = root_id.0, "btree grew a level");
                }
            }
        }
        self.put(node);

        self.len += 1;
        self.header_dirty = true;
        Ok(())
    }

    /// Split a full node around its middle entry. `node` keeps the lower
    /// half; the upper half is returned with the promoted entry.
    fn split(&self, store: &mut ObjectStore, node: &mut Node<V>) -> Result<(Entry<V>, Node<V>)> {
        let mid = node.entries.len() / 2;
        let upper = node.entries.split_off(mid + 1);
        let median = node.entries.pop().ok_or_else(|| Error::corruption("split of an empty node"))?;
        let children = if node.is_leaf() {
            Vec::new()
        } else {
            node.children.split_off(mid + 1)
        };

        let right = Node {
            id: store.allocate_id()?,
            entries: upper,
            children,
        };
        Ok((median, right))
    }

    // ========================================================================
    // Delete
    // ========================================================================

    /// Remove `key`, returning its value. An absent key returns `None`.
    pub fn delete(&mut self, store: &mut ObjectStore, key: u64) -> Result<Option<V>> {
        let mut path: Vec<(ObjectId, usize)> = Vec::new();
        let mut id = self.root;
        let position = loop {
            let node = self.load_node(store, id)?;
            match node.search(key) {
                Ok(i) => break i,
                Err(_) if node.is_leaf() => return Ok(None),
                Err(i) => {
                    path.push((id, i));
                    id = node.children[i];
                }
            }
        };

        let mut node = self.take(store, id)?;
        let (removed, mut current) = if node.is_leaf() {
            let removed = node.entries.remove(position);
            (removed, node)
        } else {
            // Swap in the predecessor: the largest key of child `position`.
            path.push((node.id, position));
            let mut child_id = node.children[position];
            self.put(node);
            loop {
                let child = self.load_node(store, child_id)?;
                if child.is_leaf() {
                    break;
                }
                let last = child.children.len() - 1;
                path.push((child_id, last));
                child_id = child.children[last];
            }

            let mut leaf = self.take(store, child_id)?;
            let predecessor = leaf
                .entries
                .pop()
                .ok_or_else(|| Error::corruption(format!("{} is an empty leaf", child_id)))?;
            let mut holder = self.take(store, id)?;
            let removed = std::mem::replace(&mut holder.entries[position], predecessor);
            self.put(holder);
            (removed, leaf)
        };

        while current.id != self.root && current.entries.len() < self.min_keys() {
            let (parent_id, index) = path
                .pop()
                .ok_or_else(|| Error::corruption("underflowed node has no parent"))?;
            let mut parent = self.take(store, parent_id)?;
            self.rebalance(store, &mut parent, index, current)?;
            current = parent;
        }

        if current.id == self.root && current.entries.is_empty() && !current.is_leaf() {
            let old_root = current.id;
            self.root = current.children[0];
            self.free(old_root);
            tracing::trace!(tree = self.id.0, root = self.root.0, "btree lost a level");
        } else {
            self.put(current);
        }

        self.len -= 1;
        self.header_dirty = true;
        Ok(Some(removed.value))
    }

    /// Fix an underflowed child of `parent` at `index`: borrow from the
    /// richer sibling (right on a tie) if it can spare a key, otherwise
    /// merge with the left sibling, or the right one if there is none.
    fn rebalance(
        &mut self,
        store: &mut ObjectStore,
        parent: &mut Node<V>,
        index: usize,
        mut child: Node<V>,
    ) -> Result<()> {
        // Siblings are read as copies; only the one that changes goes back.
        let left = match index {
            0 => None,
            _ => Some(self.load_node(store, parent.children[index - 1])?),
        };
        let right = match parent.children.get(index + 1) {
            Some(&id) => Some(self.load_node(store, id)?),
            None => None,
        };

        let left_len = left.as_ref().map_or(0, |n| n.entries.len());
        let right_len = right.as_ref().map_or(0, |n| n.entries.len());
        let min = self.min_keys();

        if right_len >= left_len && right_len > min {
            if let Some(mut right) = right {
                let separator = std::mem::replace(&mut parent.entries[index], right.entries.remove(0));
                child.entries.push(separator);
                if !right.is_leaf() {
                    child.children.push(right.children.remove(0));
                }
                self.put(right);
            }
            self.put(child);
            return Ok(());
        }

        if left_len > right_len && left_len > min {
            if let Some(mut left) = left {
                let borrowed = left
                    .entries
                    .pop()
                    .ok_or_else(|| Error::corruption("borrow from an empty sibling"))?;
                let separator = std::mem::replace(&mut parent.entries[index - 1], borrowed);
                child.entries.insert(0, separator);
                if let Some(grandchild) = left.children.pop() {
                    child.children.insert(0, grandchild);
                }
                self.put(left);
            }
            self.put(child);
            return Ok(());
        }

        match (left, right) {
            (Some(mut left), _) => {
                left.entries.push(parent.entries.remove(index - 1));
                left.entries.append(&mut child.entries);
                left.children.append(&mut child.children);
                parent.children.remove(index);
                self.free(child.id);
                self.put(left);
            }
            (None, Some(mut right)) => {
                child.entries.push(parent.entries.remove(index));
                child.entries.append(&mut right.entries);
                child.children.append(&mut right.children);
                parent.children.remove(index + 1);
                self.free(right.id);
                self.put(child);
            }
            (None, None) => {
                return Err(Error::corruption(format!(
                    "{} has no sibling to merge with",
                    child.id
                )))
            }
        }
        Ok(())
    }

    // ========================================================================
    // Traversal
    // ========================================================================

    /// All entries in key order.
    pub fn entries(&self, store: &ObjectStore) -> Result<Vec<(u64, V)>> {
        let mut out = Vec::with_capacity(self.len as usize);
        self.collect(store, self.root, &mut out)?;
        Ok(out)
    }

    /// All keys in order.
    pub fn keys(&self, store: &ObjectStore) -> Result<Vec<u64>> {
        Ok(self.entries(store)?.into_iter().map(|(key, _)| key).collect())
    }

    fn collect(&self, store: &ObjectStore, id: ObjectId, out: &mut Vec<(u64, V)>) -> Result<()> {
        let node = self.load_node(store, id)?;
        for (i, entry) in node.entries.into_iter().enumerate() {
            if let Some(&child) = node.children.get(i) {
                self.collect(store, child, out)?;
            }
            out.push((entry.key, entry.value));
        }
        if let Some(&last) = node.children.last() {
            self.collect(store, last, out)?;
        }
        Ok(())
    }

    /// Number of levels; 1 for a tree that is a single leaf.
    pub fn height(&self, store: &ObjectStore) -> Result<usize> {
        let mut height = 1;
        let mut node = self.load_node(store, self.root)?;
        while let Some(&first) = node.children.first() {
            node = self.load_node(store, first)?;
            height += 1;
        }
        Ok(height)
    }

    /// Verify key order, node fill, child counts, uniform leaf depth and
    /// the stored length.
    ///
    /// # Errors
    /// Returns `Error::Corruption` describing the first violation.
    pub fn check_invariants(&self, store: &ObjectStore) -> Result<()> {
        let mut leaf_depth = None;
        let count = self.check_node(store, self.root, 1, None, None, &mut leaf_depth)?;
        if count != self.len {
            return Err(Error::corruption(format!(
                "tree holds {} keys but records {}",
                count, self.len
            )));
        }
        Ok(())
    }

    fn check_node(
        &self,
        store: &ObjectStore,
        id: ObjectId,
        depth: usize,
        lower: Option<u64>,
        upper: Option<u64>,
        leaf_depth: &mut Option<usize>,
    ) -> Result<u64> {
        let node = self.load_node(store, id)?;
        let keys = node.keys();

        if keys.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(Error::corruption(format!("{} keys out of order", id)));
        }
        let out_of_range = keys.iter().any(|&key| {
            lower.is_some_and(|low| key <= low) || upper.is_some_and(|high| key >= high)
        });
        if out_of_range {
            return Err(Error::corruption(format!("{} has keys outside its range", id)));
        }
        if keys.len() >= self.order {
            return Err(Error::corruption(format!("{} is overfull", id)));
        }
        if id != self.root && keys.len() < self.min_keys() {
            return Err(Error::corruption(format!("{} is underfull", id)));
        }

        if node.is_leaf() {
            match *leaf_depth {
                Some(expected) if expected != depth => {
                    return Err(Error::corruption(format!("{} is a leaf at depth {}", id, depth)))
                }
                _ => *leaf_depth = Some(depth),
            }
            return Ok(keys.len() as u64);
        }

        if node.children.len() != keys.len() + 1 {
            return Err(Error::corruption(format!(
                "{} has {} keys but {} children",
                id,
                keys.len(),
                node.children.len()
            )));
        }
        let mut count = keys.len() as u64;
        for (i, &child) in node.children.iter().enumerate() {
            let low = if i == 0 { lower } else { Some(keys[i - 1]) };
            let high = keys.get(i).copied().or(upper);
            count += self.check_node(store, child, depth + 1, low, high, leaf_depth)?;
        }
        Ok(count)
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Write changed nodes and the tree header to the object store, and
    /// drop freed nodes from it.
    pub fn save(&mut self, store: &mut ObjectStore) -> Result<()> {
        let written = self.nodes.len();
        for node in self.nodes.values() {
            store.save_object(node.id, node)?;
        }
        self.nodes.clear();

        for id in std::mem::take(&mut self.freed) {
            if store.contains(id) {
                store.delete_object(id)?;
            }
        }

        if self.header_dirty {
            let header = TreeHeader {
                order: self.order as u64,
                root: self.root,
                len: self.len,
            };
            store.save_object(self.id, &header)?;
            self.header_dirty = false;
        }
        tracing::debug!(tree = self.id.0, nodes = written, "saved btree");
        Ok(())
    }

    /// Whether there are unsaved changes.
    pub fn is_dirty(&self) -> bool {
        self.header_dirty || !self.nodes.is_empty() || !self.freed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::PageCache;
    use crate::common::config::PersistenceMode;
    use crate::storage::{FilePersistenceManager, PageStore};
    use std::sync::Arc;
    use tempfile::{tempdir, TempDir};

    fn object_store() -> (TempDir, ObjectStore) {
        let dir = tempdir().unwrap();
        let pm = FilePersistenceManager::new();
        let pages = PageStore::create_file(&pm, dir.path().join("data.sdb"), 512, Arc::new(PageCache::new(64))).unwrap();
        let store = ObjectStore::new(Arc::new(pages), PersistenceMode::AppendOnly, 16);
        (dir, store)
    }

    fn tree_with(store: &mut ObjectStore, order: usize, keys: impl IntoIterator<Item = u64>) -> BTree<u64> {
        let mut tree = BTree::create(store, order).unwrap();
        for key in keys {
            tree.insert(store, key, key * 10).unwrap();
        }
        tree
    }

    fn root_keys(tree: &BTree<u64>, store: &ObjectStore) -> Vec<u64> {
        tree.load_node(store, tree.root()).unwrap().keys()
    }

    fn child_keys(tree: &BTree<u64>, store: &ObjectStore, id: ObjectId) -> Vec<Vec<u64>> {
        tree.load_node(store, id)
            .unwrap()
            .children()
            .iter()
            .map(|&child| tree.load_node(store, child).unwrap().keys())
            .collect()
    }

    #[test]
    fn test_create_rejects_small_order() {
        let (_dir, mut store) = object_store();
        assert!(matches!(BTree::<u64>::create(&mut store, 2), Err(Error::Config(_))));
    }

    #[test]
    fn test_split_order_three() {
        let (_dir, mut store) = object_store();
        let tree = tree_with(&mut store, 3, 1..=3);

        assert_eq!(root_keys(&tree, &store), vec![2]);
        assert_eq!(child_keys(&tree, &store, tree.root()), vec![vec![1], vec![3]]);
        assert_eq!(tree.height(&store).unwrap(), 2);
    }

    #[test]
    fn test_propagating_splits() {
        let (_dir, mut store) = object_store();
        let tree = tree_with(&mut store, 3, 1..=7);

        assert_eq!(root_keys(&tree, &store), vec![4]);
        let root = tree.load_node(&store, tree.root()).unwrap();
        assert_eq!(child_keys(&tree, &store, tree.root()), vec![vec![2], vec![6]]);
        assert_eq!(child_keys(&tree, &store, root.children()[0]), vec![vec![1], vec![3]]);
        assert_eq!(child_keys(&tree, &store, root.children()[1]), vec![vec![5], vec![7]]);
        tree.check_invariants(&store).unwrap();
    }

    #[test]
    fn test_duplicate_rejected_without_change() {
        let (_dir, mut store) = object_store();
        let mut tree = tree_with(&mut store, 3, 1..=7);

        assert!(matches!(tree.insert(&mut store, 4, 0), Err(Error::DuplicateKey(4))));
        assert!(matches!(tree.insert(&mut store, 7, 0), Err(Error::DuplicateKey(7))));
        assert_eq!(tree.len(), 7);
        assert_eq!(tree.get(&store, 4).unwrap(), Some(40));
        assert_eq!(tree.keys(&store).unwrap(), (1..=7).collect::<Vec<_>>());
    }

    #[test]
    fn test_lookup_stops_at_internal_match() {
        let (_dir, mut store) = object_store();
        let tree = tree_with(&mut store, 3, 1..=7);

        let node = tree.lookup(&store, 4).unwrap().unwrap();
        assert_eq!(node.id(), tree.root());
        assert!(tree.lookup(&store, 8).unwrap().is_none());
        assert_eq!(tree.lookup(&store, 5).unwrap().unwrap().keys(), vec![5]);
    }

    #[test]
    fn test_delete_from_leaf() {
        let (_dir, mut store) = object_store();
        let mut tree = tree_with(&mut store, 5, [10, 20, 30]);

        assert_eq!(tree.delete(&mut store, 20).unwrap(), Some(200));
        assert_eq!(tree.delete(&mut store, 20).unwrap(), None);
        assert_eq!(tree.keys(&store).unwrap(), vec![10, 30]);
    }

    #[test]
    fn test_delete_borrows_from_right_sibling() {
        let (_dir, mut store) = object_store();
        let mut tree = tree_with(&mut store, 4, 1..=5);
        assert_eq!(root_keys(&tree, &store), vec![3]);
        assert_eq!(child_keys(&tree, &store, tree.root()), vec![vec![1, 2], vec![4, 5]]);

        tree.delete(&mut store, 1).unwrap();
        tree.delete(&mut store, 2).unwrap();

        assert_eq!(root_keys(&tree, &store), vec![4]);
        assert_eq!(child_keys(&tree, &store, tree.root()), vec![vec![3], vec![5]]);
        tree.check_invariants(&store).unwrap();
    }

    #[test]
    fn test_borrow_tie_prefers_right_sibling() {
        let (_dir, mut store) = object_store();
        let mut tree = tree_with(&mut store, 4, 1..=8);
        assert_eq!(root_keys(&tree, &store), vec![3, 6]);
        assert_eq!(
            child_keys(&tree, &store, tree.root()),
            vec![vec![1, 2], vec![4, 5], vec![7, 8]]
        );

        tree.delete(&mut store, 4).unwrap();
        tree.delete(&mut store, 5).unwrap();

        assert_eq!(root_keys(&tree, &store), vec![3, 7]);
        assert_eq!(
            child_keys(&tree, &store, tree.root()),
            vec![vec![1, 2], vec![6], vec![8]]
        );
        tree.check_invariants(&store).unwrap();
    }

    #[test]
    fn test_delete_borrows_from_left_sibling() {
        let (_dir, mut store) = object_store();
        // Root [3], leaves [1, 2] and [4].
        let mut tree = tree_with(&mut store, 4, [2, 3, 4, 1]);
        assert_eq!(child_keys(&tree, &store, tree.root()), vec![vec![1, 2], vec![4]]);

        tree.delete(&mut store, 4).unwrap();

        assert_eq!(root_keys(&tree, &store), vec![2]);
        assert_eq!(child_keys(&tree, &store, tree.root()), vec![vec![1], vec![3]]);
        tree.check_invariants(&store).unwrap();
    }

    #[test]
    fn test_delete_borrows_from_richer_left_sibling() {
        let (_dir, mut store) = object_store();
        let mut tree = tree_with(&mut store, 5, [10, 20, 30, 40, 50, 60, 70, 80, 1, 2]);
        assert_eq!(root_keys(&tree, &store), vec![30, 60]);
        assert_eq!(
            child_keys(&tree, &store, tree.root()),
            vec![vec![1, 2, 10, 20], vec![40, 50], vec![70, 80]]
        );
        tree.save(&mut store).unwrap();
        let right = tree.load_node(&store, tree.root()).unwrap().children()[2];

        tree.delete(&mut store, 40).unwrap();

        assert_eq!(root_keys(&tree, &store), vec![20, 60]);
        assert_eq!(
            child_keys(&tree, &store, tree.root()),
            vec![vec![1, 2, 10], vec![30, 50], vec![70, 80]]
        );
        // The untouched right sibling is not queued for rewriting.
        assert!(!tree.nodes.contains_key(&right));
        tree.check_invariants(&store).unwrap();
    }

    #[test]
    fn test_merge_leaves_other_sibling_clean() {
        let (_dir, mut store) = object_store();
        let mut tree = tree_with(&mut store, 4, 1..=8);
        tree.delete(&mut store, 1).unwrap();
        tree.delete(&mut store, 7).unwrap();
        tree.save(&mut store).unwrap();
        assert_eq!(
            child_keys(&tree, &store, tree.root()),
            vec![vec![2], vec![4, 5], vec![8]]
        );
        let right = tree.load_node(&store, tree.root()).unwrap().children()[2];

        tree.delete(&mut store, 4).unwrap();
        tree.delete(&mut store, 5).unwrap();

        assert_eq!(root_keys(&tree, &store), vec![6]);
        assert_eq!(child_keys(&tree, &store, tree.root()), vec![vec![2, 3], vec![8]]);
        assert!(!tree.nodes.contains_key(&right));
        tree.check_invariants(&store).unwrap();
    }

    #[test]
    fn test_open_rejects_corrupt_order() {
        let (_dir, mut store) = object_store();
        let mut tree = tree_with(&mut store, 4, 1..=5);
        tree.save(&mut store).unwrap();

        let header = TreeHeader {
            order: 1,
            root: tree.root(),
            len: tree.len(),
        };
        store.save_object(tree.id(), &header).unwrap();

        assert!(matches!(BTree::<u64>::open(&store, tree.id()), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_delete_merges_and_collapses_root() {
        let (_dir, mut store) = object_store();
        let mut tree = tree_with(&mut store, 3, 1..=3);

        tree.delete(&mut store, 1).unwrap();

        assert_eq!(tree.height(&store).unwrap(), 1);
        assert_eq!(root_keys(&tree, &store), vec![2, 3]);
        tree.check_invariants(&store).unwrap();
    }

    #[test]
    fn test_delete_internal_key_uses_predecessor() {
        let (_dir, mut store) = object_store();
        let mut tree = tree_with(&mut store, 3, 1..=7);

        assert_eq!(tree.delete(&mut store, 4).unwrap(), Some(40));
        assert!(tree.lookup(&store, 4).unwrap().is_none());
        assert_eq!(tree.keys(&store).unwrap(), vec![1, 2, 3, 5, 6, 7]);
        tree.check_invariants(&store).unwrap();
    }

    #[test]
    fn test_delete_everything() {
        let (_dir, mut store) = object_store();
        let mut tree = tree_with(&mut store, 3, 1..=50);
        for key in (1..=50).rev().step_by(2).chain((1..=50).rev().skip(1).step_by(2)) {
            assert!(tree.delete(&mut store, key).unwrap().is_some());
            tree.check_invariants(&store).unwrap();
        }
        assert!(tree.is_empty());
        assert_eq!(tree.height(&store).unwrap(), 1);
    }

    #[test]
    fn test_save_and_reopen() {
        let (_dir, mut store) = object_store();
        let mut tree = tree_with(&mut store, 4, (1..=40).rev());
        tree.delete(&mut store, 17).unwrap();
        tree.save(&mut store).unwrap();
        assert!(!tree.is_dirty());

        let reopened: BTree<u64> = BTree::open(&store, tree.id()).unwrap();
        assert_eq!(reopened.len(), 39);
        assert_eq!(reopened.keys(&store).unwrap(), tree.keys(&store).unwrap());
        assert_eq!(reopened.get(&store, 30).unwrap(), Some(300));
        reopened.check_invariants(&store).unwrap();
    }

    #[test]
    fn test_save_deletes_freed_nodes() {
        let (_dir, mut store) = object_store();
        let mut tree = tree_with(&mut store, 3, 1..=3);
        tree.save(&mut store).unwrap();
        let children: Vec<ObjectId> = tree.load_node(&store, tree.root()).unwrap().children().to_vec();

        tree.delete(&mut store, 3).unwrap();
        tree.save(&mut store).unwrap();

        let live = children.iter().filter(|id| store.contains(**id)).count();
        assert_eq!(live, 1);
    }
}
