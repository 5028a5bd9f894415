//! Crash recovery through the store facade.
//!
//! Damage is applied to the files between sessions: torn or missing
//! master records, and page slots flushed by a commit whose commit point
//! never reached the master file.

use std::path::Path;

use stardb::common::config::{DATA_FILE_NAME, MASTER_FILE_NAME};
use stardb::storage::MasterHeader;
use stardb::{BTree, Error, FilePersistenceManager, ObjectId, PersistenceMode, Store, StoreConfig};
use tempfile::tempdir;
use uuid::Uuid;

/// Primary half followed by an identical shadow half.
const RECORD_SIZE: usize = 128;
const HALF_SIZE: usize = 64;

fn config(mode: PersistenceMode) -> StoreConfig {
    StoreConfig::builder()
        .page_size(512)
        .btree_order(4)
        .container_capacity(8)
        .persistence_mode(mode)
        .build()
}

fn record_offset(index: usize) -> usize {
    MasterHeader::SIZE + index * RECORD_SIZE
}

fn flip_byte(path: &Path, offset: usize) {
    let mut bytes = std::fs::read(path).unwrap();
    bytes[offset] ^= 0xFF;
    std::fs::write(path, bytes).unwrap();
}

/// Drop master records from `index` on, as if the appends never happened.
fn cut_master(dir: &Path, index: usize) {
    let path = dir.join(MASTER_FILE_NAME);
    let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
    file.set_len(record_offset(index) as u64).unwrap();
}

/// Commit 1 holds keys 0..40 mapped to themselves; commit 2 maps them to
/// `key + 100` and adds 40..60.
fn two_commits(dir: &Path, mode: PersistenceMode) -> ObjectId {
    let pm = FilePersistenceManager::new();
    let mut store = Store::create(&pm, dir, config(mode)).unwrap();
    let mut tree = store.create_btree::<u64>().unwrap();
    for key in 0..40u64 {
        tree.insert(store.objects_mut(), key, key).unwrap();
    }
    tree.save(store.objects_mut()).unwrap();
    store.commit(Uuid::new_v4()).unwrap();

    for key in 0..40u64 {
        tree.delete(store.objects_mut(), key).unwrap();
        tree.insert(store.objects_mut(), key, key + 100).unwrap();
    }
    for key in 40..60u64 {
        tree.insert(store.objects_mut(), key, key + 100).unwrap();
    }
    tree.save(store.objects_mut()).unwrap();
    store.commit(Uuid::new_v4()).unwrap();
    tree.id()
}

fn values(tree: &BTree<u64>, store: &Store) -> Vec<(u64, u64)> {
    tree.entries(store.objects()).unwrap()
}

#[test]
fn test_torn_half_keeps_latest_commit() {
    let dir = tempdir().unwrap();
    let tree_id = two_commits(dir.path(), PersistenceMode::AppendOnly);
    flip_byte(&dir.path().join(MASTER_FILE_NAME), record_offset(1) + HALF_SIZE + 20);

    let pm = FilePersistenceManager::new();
    let store = Store::open(&pm, dir.path(), StoreConfig::default()).unwrap();
    assert_eq!(store.recovery().healed, 1);
    assert_eq!(store.latest_commit_point().unwrap().commit_number, 2);

    let tree = store.open_btree::<u64>(tree_id).unwrap();
    assert_eq!(tree.len(), 60);
    assert_eq!(tree.get(store.objects(), 5).unwrap(), Some(105));
}

#[test]
fn test_fully_corrupt_record_falls_back_one_commit() {
    let dir = tempdir().unwrap();
    let tree_id = two_commits(dir.path(), PersistenceMode::AppendOnly);
    let master = dir.path().join(MASTER_FILE_NAME);
    flip_byte(&master, record_offset(1) + 9);
    flip_byte(&master, record_offset(1) + HALF_SIZE + 9);

    let pm = FilePersistenceManager::new();
    {
        let mut store = Store::open(&pm, dir.path(), StoreConfig::default()).unwrap();
        assert_eq!(store.recovery().discarded, 1);
        assert_eq!(store.commit_points().len(), 1);

        let mut tree = store.open_btree::<u64>(tree_id).unwrap();
        let expected: Vec<(u64, u64)> = (0..40).map(|key| (key, key)).collect();
        assert_eq!(values(&tree, &store), expected);

        tree.insert(store.objects_mut(), 500, 5).unwrap();
        tree.save(store.objects_mut()).unwrap();
        assert_eq!(store.commit(Uuid::new_v4()).unwrap().commit_number, 2);
    }

    let store = Store::open(&pm, dir.path(), StoreConfig::default()).unwrap();
    assert!(store.recovery().is_clean());
    let tree = store.open_btree::<u64>(tree_id).unwrap();
    assert_eq!(tree.len(), 41);
    assert_eq!(tree.get(store.objects(), 3).unwrap(), Some(3));
    assert_eq!(tree.get(store.objects(), 500).unwrap(), Some(5));
    tree.check_invariants(store.objects()).unwrap();
}

#[test]
fn test_lost_commit_point_append_only() {
    let dir = tempdir().unwrap();
    let tree_id = two_commits(dir.path(), PersistenceMode::AppendOnly);
    let data_len = std::fs::metadata(dir.path().join(DATA_FILE_NAME)).unwrap().len();
    cut_master(dir.path(), 1);

    let pm = FilePersistenceManager::new();
    let store = Store::open(&pm, dir.path(), StoreConfig::default()).unwrap();
    assert!(store.recovery().is_clean());
    assert_eq!(store.latest_commit_point().unwrap().commit_number, 1);
    assert!(std::fs::metadata(dir.path().join(DATA_FILE_NAME)).unwrap().len() < data_len);

    let tree = store.open_btree::<u64>(tree_id).unwrap();
    assert_eq!(tree.len(), 40);
    assert_eq!(tree.get(store.objects(), 7).unwrap(), Some(7));
    assert_eq!(tree.get(store.objects(), 45).unwrap(), None);
}

#[test]
fn test_lost_commit_point_rewrite_stays_lost() {
    let dir = tempdir().unwrap();
    let tree_id = two_commits(dir.path(), PersistenceMode::Rewrite);
    cut_master(dir.path(), 1);

    let pm = FilePersistenceManager::new();
    {
        let mut store = Store::open(&pm, dir.path(), StoreConfig::default()).unwrap();
        let mut tree = store.open_btree::<u64>(tree_id).unwrap();
        assert_eq!(tree.get(store.objects(), 7).unwrap(), Some(7));

        // A small commit that reuses the lost commit's number but leaves
        // most pages alone.
        tree.insert(store.objects_mut(), 1000, 1).unwrap();
        tree.save(store.objects_mut()).unwrap();
        assert_eq!(store.commit(Uuid::new_v4()).unwrap().commit_number, 2);
    }

    let store = Store::open(&pm, dir.path(), StoreConfig::default()).unwrap();
    let tree = store.open_btree::<u64>(tree_id).unwrap();
    let mut expected: Vec<(u64, u64)> = (0..40).map(|key| (key, key)).collect();
    expected.push((1000, 1));
    assert_eq!(values(&tree, &store), expected);
    tree.check_invariants(store.objects()).unwrap();
}

#[test]
fn test_corrupt_header_fails_open() {
    let dir = tempdir().unwrap();
    two_commits(dir.path(), PersistenceMode::AppendOnly);
    flip_byte(&dir.path().join(MASTER_FILE_NAME), 20);

    let pm = FilePersistenceManager::new();
    assert!(matches!(
        Store::open(&pm, dir.path(), StoreConfig::default()),
        Err(Error::Corruption(_))
    ));
}

#[test]
fn test_snapshot_of_every_append_only_commit() {
    let dir = tempdir().unwrap();
    let tree_id = two_commits(dir.path(), PersistenceMode::AppendOnly);
    let pm = FilePersistenceManager::new();

    let first = Store::open_at(&pm, dir.path(), 1, StoreConfig::default()).unwrap();
    let second = Store::open_at(&pm, dir.path(), 2, StoreConfig::default()).unwrap();
    let old = first.open_btree::<u64>(tree_id).unwrap();
    let new = second.open_btree::<u64>(tree_id).unwrap();

    assert_eq!(old.len(), 40);
    assert_eq!(new.len(), 60);
    assert_eq!(old.get(first.objects(), 10).unwrap(), Some(10));
    assert_eq!(new.get(second.objects(), 10).unwrap(), Some(110));
}
