//! Store - one directory holding a master file and a page file.
//!
//! [`Store`] ties the layers into a commit/reopen lifecycle:
//!
//! ```text
//! commit(job_id)
//!   1. ObjectStore writes dirty containers + the store-state record
//!   2. PageStore flushes every dirty page and syncs
//!   3. MasterFile appends the commit point (txn, state offset) and syncs
//! ```
//!
//! A crash before step 3 leaves the previous commit point current; the
//! half-written pages are ignored, then trimmed and blanked on the next
//! open.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::buffer::PageCache;
use crate::common::config::{PersistenceMode, StoreConfig, DATA_FILE_NAME, MASTER_FILE_NAME};
use crate::common::{Error, ObjectId, Result, TxnId};
use crate::index::BTree;
use crate::object::ObjectStore;
use crate::storage::{
    CommitPoint, MasterFile, MasterHeader, PageStore, PersistenceManager, RecoveryReport,
};

/// An open store.
pub struct Store {
    dir: PathBuf,
    config: StoreConfig,
    master: MasterFile,
    pages: Arc<PageStore>,
    objects: ObjectStore,
    /// Set when opened read-only at a past commit.
    snapshot: Option<CommitPoint>,
}

impl Store {
    /// Create a new store in `dir` with its own page cache and store set.
    ///
    /// # Errors
    /// - `Error::Config` for an invalid config
    /// - `Error::InvalidOperation` if `dir` already holds a store
    pub fn create(pm: &dyn PersistenceManager, dir: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        let cache = Arc::new(PageCache::new(config.cache_capacity.max(1)));
        Self::create_shared(pm, dir, config, Uuid::new_v4(), cache)
    }

    /// Create a new store that belongs to `store_set_id` and reads through
    /// a cache shared with other stores.
    pub fn create_shared(
        pm: &dyn PersistenceManager,
        dir: impl AsRef<Path>,
        config: StoreConfig,
        store_set_id: Uuid,
        cache: Arc<PageCache>,
    ) -> Result<Self> {
        config.validate()?;
        let dir = dir.as_ref();
        if !pm.directory_exists(dir) {
            pm.create_directory(dir)?;
        }
        let master_path = dir.join(MASTER_FILE_NAME);
        if pm.file_exists(&master_path) {
            return Err(Error::invalid_op(format!(
                "{} already holds a store",
                dir.display()
            )));
        }

        let master = MasterFile::create(pm, &master_path, &config, store_set_id)?;
        let pages = Arc::new(PageStore::create_file(
            pm,
            dir.join(DATA_FILE_NAME),
            config.page_size,
            cache,
        )?);
        let objects = ObjectStore::new(pages.clone(), config.persistence_mode, config.container_capacity);

        tracing::info!(dir = %dir.display(), store_id = %master.store_id(), "created store");
        Ok(Self {
            dir: dir.to_path_buf(),
            config,
            master,
            pages,
            objects,
            snapshot: None,
        })
    }

    /// Open the latest commit of the store in `dir` for writing.
    ///
    /// The page size and persistence mode recorded at creation override
    /// those in `config`.
    pub fn open(pm: &dyn PersistenceManager, dir: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        let cache = Arc::new(PageCache::new(config.cache_capacity.max(1)));
        Self::open_shared(pm, dir, config, cache)
    }

    /// Like [`open`](Self::open), reading through a shared cache.
    pub fn open_shared(
        pm: &dyn PersistenceManager,
        dir: impl AsRef<Path>,
        config: StoreConfig,
        cache: Arc<PageCache>,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        let master = MasterFile::open(pm, dir.join(MASTER_FILE_NAME))?;
        let config = effective_config(config, master.header());
        let latest = master.get_latest_commit_point();
        let committed = TxnId::new(latest.map_or(0, |point| point.commit_number));

        let pages = Arc::new(PageStore::open(
            pm,
            dir.join(DATA_FILE_NAME),
            config.page_size,
            cache,
            committed,
            false,
        )?);
        let objects = load_objects(&pages, &config, latest)?;

        let recovery = master.recovery();
        if !recovery.is_clean() {
            tracing::warn!(?recovery, "master file was repaired on open");
        }
        tracing::info!(dir = %dir.display(), %committed, "opened store");
        Ok(Self {
            dir: dir.to_path_buf(),
            config,
            master,
            pages,
            objects,
            snapshot: None,
        })
    }

    /// Open a read-only view of the store as of `commit_number`.
    ///
    /// In append-only mode every commit point that was durable when the
    /// snapshot opened stays readable, as long as no page it reads is
    /// rewritten twice by commits made after it opened. In rewrite mode
    /// the same applies to commits made after `commit_number`. Either
    /// case fails with `Error::SnapshotUnavailable`.
    pub fn open_at(
        pm: &dyn PersistenceManager,
        dir: impl AsRef<Path>,
        commit_number: u64,
        config: StoreConfig,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        let master = MasterFile::open_read_only(pm, dir.join(MASTER_FILE_NAME))?;
        let config = effective_config(config, master.header());
        let point = master.get_commit_point(commit_number).ok_or_else(|| {
            Error::invalid_op(format!("no commit point {} in {}", commit_number, dir.display()))
        })?;
        let latest = master
            .get_latest_commit_point()
            .map_or(commit_number, |latest| latest.commit_number);

        let cache = Arc::new(PageCache::new(config.cache_capacity.max(1)));
        let pages = Arc::new(PageStore::open(
            pm,
            dir.join(DATA_FILE_NAME),
            config.page_size,
            cache,
            TxnId::new(latest),
            true,
        )?);
        let reader = match config.persistence_mode {
            // Committed heap bytes are never overwritten.
            PersistenceMode::AppendOnly => None,
            PersistenceMode::Rewrite => Some(TxnId::new(commit_number)),
        };
        let objects = ObjectStore::load(
            pages.clone(),
            config.persistence_mode,
            point.location_offset,
            reader,
        )?;

        tracing::info!(dir = %dir.display(), commit = commit_number, "opened store snapshot");
        Ok(Self {
            dir: dir.to_path_buf(),
            config,
            master,
            pages,
            objects,
            snapshot: Some(point),
        })
    }

    /// Remove the store's files.
    pub fn destroy(pm: &dyn PersistenceManager, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        for name in [DATA_FILE_NAME, MASTER_FILE_NAME] {
            let path = dir.join(name);
            if pm.file_exists(&path) {
                pm.delete_file(&path)?;
            }
        }
        tracing::info!(dir = %dir.display(), "destroyed store");
        Ok(())
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Make every change since the last commit durable.
    ///
    /// On failure the store is rolled back to the previous commit and the
    /// error is returned.
    pub fn commit(&mut self, job_id: Uuid) -> Result<CommitPoint> {
        self.check_writable()?;
        let txn = self.objects.txn();

        let result = self.objects.write_commit_state().and_then(|location_offset| {
            let point = CommitPoint::new(txn.0, location_offset, job_id);
            let master = &self.master;
            self.pages
                .commit(txn, |_| master.append_commit_point(point))
                .map(|()| point)
        });

        match result {
            Ok(point) => {
                self.objects.advance(txn);
                tracing::info!(
                    commit = point.commit_number,
                    offset = point.location_offset,
                    job = %job_id,
                    "committed"
                );
                tracing::debug!(cache = %self.cache().stats().snapshot(), "page cache after commit");
                Ok(point)
            }
            Err(err) => {
                tracing::warn!(%txn, error = %err, "commit failed; rolling back");
                if let Err(rollback_err) = self.rollback() {
                    tracing::warn!(error = %rollback_err, "rollback after failed commit failed");
                }
                Err(err)
            }
        }
    }

    /// Discard every change since the last commit.
    ///
    /// Open [`BTree`] handles must be reopened afterwards.
    pub fn rollback(&mut self) -> Result<()> {
        self.check_writable()?;
        let txn = self.objects.txn();
        self.pages.rollback(txn)?;
        self.objects = load_objects(&self.pages, &self.config, self.master.get_latest_commit_point())?;
        tracing::info!(%txn, "rolled back");
        Ok(())
    }

    // ========================================================================
    // Trees
    // ========================================================================

    /// Create a B-tree with the configured order.
    pub fn create_btree<V>(&mut self) -> Result<BTree<V>>
    where
        V: Clone + Serialize + DeserializeOwned,
    {
        BTree::create(&mut self.objects, self.config.btree_order)
    }

    /// Open a saved B-tree by id.
    pub fn open_btree<V>(&self, id: ObjectId) -> Result<BTree<V>>
    where
        V: Clone + Serialize + DeserializeOwned,
    {
        BTree::open(&self.objects, id)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    pub fn objects_mut(&mut self) -> &mut ObjectStore {
        &mut self.objects
    }

    pub fn page_store(&self) -> &Arc<PageStore> {
        &self.pages
    }

    pub fn cache(&self) -> &Arc<PageCache> {
        self.pages.cache()
    }

    /// Commit points, most recent first.
    pub fn commit_points(&self) -> Vec<CommitPoint> {
        self.master.get_commit_points()
    }

    pub fn latest_commit_point(&self) -> Option<CommitPoint> {
        self.master.get_latest_commit_point()
    }

    /// The commit a read-only snapshot was opened at.
    pub fn snapshot(&self) -> Option<CommitPoint> {
        self.snapshot
    }

    pub fn store_id(&self) -> Uuid {
        self.master.store_id()
    }

    pub fn store_set_id(&self) -> Uuid {
        self.master.header().store_set_id
    }

    /// Effective configuration; persisted options included.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Repairs the master file needed when it was opened.
    pub fn recovery(&self) -> RecoveryReport {
        self.master.recovery()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_read_only(&self) -> bool {
        self.snapshot.is_some()
    }

    fn check_writable(&self) -> Result<()> {
        if self.is_read_only() {
            return Err(Error::invalid_op("store snapshot is read-only"));
        }
        Ok(())
    }
}

/// Options recorded in the master header win over the caller's.
fn effective_config(mut config: StoreConfig, header: &MasterHeader) -> StoreConfig {
    config.page_size = header.page_size as usize;
    config.persistence_mode = header.persistence_mode;
    config.store_type = header.store_type;
    config
}

/// Rebuild the object store at `latest` and drop page data written after it.
fn load_objects(
    pages: &Arc<PageStore>,
    config: &StoreConfig,
    latest: Option<CommitPoint>,
) -> Result<ObjectStore> {
    let objects = match latest {
        Some(point) => ObjectStore::load(
            pages.clone(),
            config.persistence_mode,
            point.location_offset,
            None,
        )?,
        None => ObjectStore::new(pages.clone(), config.persistence_mode, config.container_capacity),
    };
    pages.truncate(objects.heap().pages_in_use())?;
    pages.discard_uncommitted()?;
    Ok(objects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FilePersistenceManager;
    use tempfile::tempdir;

    fn config() -> StoreConfig {
        StoreConfig::builder()
            .page_size(512)
            .btree_order(4)
            .container_capacity(8)
            .build()
    }

    #[test]
    fn test_create_twice_fails() {
        let dir = tempdir().unwrap();
        let pm = FilePersistenceManager::new();
        Store::create(&pm, dir.path(), config()).unwrap();
        assert!(matches!(
            Store::create(&pm, dir.path(), config()),
            Err(Error::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_open_without_commits() {
        let dir = tempdir().unwrap();
        let pm = FilePersistenceManager::new();
        let store_id = Store::create(&pm, dir.path(), config()).unwrap().store_id();

        let store = Store::open(&pm, dir.path(), StoreConfig::default()).unwrap();
        assert_eq!(store.store_id(), store_id);
        assert_eq!(store.config().page_size, 512);
        assert!(store.commit_points().is_empty());
    }

    #[test]
    fn test_commit_numbers_advance() {
        let dir = tempdir().unwrap();
        let pm = FilePersistenceManager::new();
        let mut store = Store::create(&pm, dir.path(), config()).unwrap();

        let first = store.commit(Uuid::new_v4()).unwrap();
        let second = store.commit(Uuid::new_v4()).unwrap();
        assert_eq!(first.commit_number, 1);
        assert_eq!(second.commit_number, 2);
        assert!(second.location_offset > first.location_offset);
        assert_eq!(store.objects().txn(), TxnId::new(3));
    }

    #[test]
    fn test_rollback_discards_objects() {
        let dir = tempdir().unwrap();
        let pm = FilePersistenceManager::new();
        let mut store = Store::create(&pm, dir.path(), config()).unwrap();

        let kept = store.objects_mut().allocate_id().unwrap();
        store.objects_mut().save_object(kept, &String::from("kept")).unwrap();
        store.commit(Uuid::new_v4()).unwrap();

        let dropped = store.objects_mut().allocate_id().unwrap();
        store.objects_mut().save_object(dropped, &String::from("dropped")).unwrap();
        store.objects_mut().save_object(kept, &String::from("changed")).unwrap();
        store.rollback().unwrap();

        assert!(!store.objects().contains(dropped));
        assert_eq!(store.objects().load_object::<String>(kept).unwrap(), "kept");
        assert_eq!(store.objects_mut().allocate_id().unwrap(), dropped);
    }

    #[test]
    fn test_persisted_mode_wins() {
        let dir = tempdir().unwrap();
        let pm = FilePersistenceManager::new();
        let rewrite = StoreConfig::builder()
            .page_size(1024)
            .persistence_mode(PersistenceMode::Rewrite)
            .build();
        Store::create(&pm, dir.path(), rewrite).unwrap();

        let store = Store::open(&pm, dir.path(), StoreConfig::default()).unwrap();
        assert_eq!(store.config().persistence_mode, PersistenceMode::Rewrite);
        assert_eq!(store.config().page_size, 1024);
    }

    #[test]
    fn test_snapshot_is_read_only() {
        let dir = tempdir().unwrap();
        let pm = FilePersistenceManager::new();
        let mut store = Store::create(&pm, dir.path(), config()).unwrap();
        store.commit(Uuid::new_v4()).unwrap();
        drop(store);

        let mut snapshot = Store::open_at(&pm, dir.path(), 1, config()).unwrap();
        assert!(snapshot.is_read_only());
        assert_eq!(snapshot.snapshot().unwrap().commit_number, 1);
        assert!(snapshot.commit(Uuid::new_v4()).is_err());
        assert!(snapshot.objects_mut().allocate_id().is_err());
        assert!(Store::open_at(&pm, dir.path(), 9, config()).is_err());
    }

    #[test]
    fn test_snapshot_outrun_by_two_commits() {
        let dir = tempdir().unwrap();
        let pm = FilePersistenceManager::new();
        let mut store = Store::create(&pm, dir.path(), config()).unwrap();
        // 632 bytes: the record runs from page 0 into the tail page 1.
        let big = store.objects_mut().allocate_id().unwrap();
        store.objects_mut().save_object(big, &vec![7u8; 600]).unwrap();
        store.commit(Uuid::new_v4()).unwrap();

        let snapshot_config = StoreConfig::builder().cache_capacity(1).build();
        let snapshot = Store::open_at(&pm, dir.path(), 1, snapshot_config).unwrap();
        assert_eq!(snapshot.objects().load_object::<Vec<u8>>(big).unwrap().len(), 600);

        // Each commit appends its state record to page 1.
        store.commit(Uuid::new_v4()).unwrap();
        store.commit(Uuid::new_v4()).unwrap();

        assert!(matches!(
            snapshot.objects().load_object::<Vec<u8>>(big),
            Err(Error::SnapshotUnavailable { .. })
        ));
        assert_eq!(store.objects().load_object::<Vec<u8>>(big).unwrap(), vec![7u8; 600]);
    }

    #[test]
    fn test_destroy_removes_files() {
        let dir = tempdir().unwrap();
        let pm = FilePersistenceManager::new();
        Store::create(&pm, dir.path(), config()).unwrap();
        Store::destroy(&pm, dir.path()).unwrap();
        assert!(!dir.path().join(MASTER_FILE_NAME).exists());
        assert!(!dir.path().join(DATA_FILE_NAME).exists());
    }
}
