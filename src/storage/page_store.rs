//! Page Store - fixed-size page allocation and durable flush.
//!
//! The [`PageStore`] handles:
//! - Allocating pages by appending to the data file
//! - Reading pages through the shared [`PageCache`]
//! - Copy-on-write upgrades tied to a transaction id
//! - Flushing a transaction's dirty pages as one batch

use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer::PageCache;
use crate::common::{Error, PageId, Result, TxnId};
use crate::storage::page::{Page, SlotHeader};
use crate::storage::persistence::{PersistenceManager, StorageFile};

/// Pages modified by the active write transaction.
#[derive(Default)]
struct DirtySet {
    txn: Option<TxnId>,
    pages: BTreeMap<PageId, Arc<Page>>,
}

impl DirtySet {
    /// Claim the dirty set for `txn`, rejecting a second writer.
    fn claim(&mut self, txn: TxnId) -> Result<()> {
        match self.txn {
            Some(owner) if owner != txn => Err(Error::invalid_op(format!(
                "{} is still writing; {} cannot start",
                owner, txn
            ))),
            _ => {
                self.txn = Some(txn);
                Ok(())
            }
        }
    }
}

/// Manages the page file of a single store.
///
/// # File Layout
/// Pages are laid out sequentially, each as a fixed-size record holding
/// both buffer slots:
/// ```text
/// ┌──────────┬──────────┬──────────┬─────────┬──────────┐
/// │ Page 0   │ Page 1   │ Page 2   │  ...    │ Page N   │
/// │ (record) │ (record) │ (record) │         │ (record) │
/// └──────────┴──────────┴──────────┴─────────┴──────────┘
/// Offset:  0    R         2R        ...       N×R
/// ```
///
/// Page N is located at file offset `N × record_size`. A page never moves
/// once allocated; updates go to the page's other buffer slot.
///
/// # Transactions
/// One write transaction at a time owns the dirty set. A page becomes
/// writeable only through [`get_writeable_page`](Self::get_writeable_page)
/// (or [`create`](Self::create)); [`commit`](Self::commit) flushes every
/// dirty page and seals them again.
///
/// Slots on disk stamped after the last durable commit belong to a
/// transaction that never finished; they are hidden when a page is loaded.
///
/// # Thread Safety
/// - `file`: `Mutex`, each record read or write is one critical section
/// - `dirty`: `Mutex`, owned by the single writer
/// - `page_count` / `committed`: atomics
pub struct PageStore {
    path: PathBuf,
    /// Cache partition key; the data file path. Read-only stores add the
    /// commit they were opened at so they never see a writer's pages.
    partition: String,
    file: Mutex<Box<dyn StorageFile>>,
    cache: Arc<PageCache>,
    page_size: usize,
    page_count: AtomicU64,
    /// Last transaction whose commit point is durable.
    committed: AtomicU64,
    dirty: Mutex<DirtySet>,
    read_only: bool,
}

impl PageStore {
    /// Create a new, empty page file.
    ///
    /// # Errors
    /// Returns an error if the file already exists or cannot be created.
    pub fn create_file(
        pm: &dyn PersistenceManager,
        path: impl AsRef<Path>,
        page_size: usize,
        cache: Arc<PageCache>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let file = pm.create_file(path)?;
        tracing::debug!(path = %path.display(), page_size, "created page store");
        Ok(Self::with_file(path, file, page_size, cache, 0, TxnId::NONE, false))
    }

    /// Open an existing page file.
    ///
    /// `committed` is the transaction of the latest durable commit point;
    /// newer slots found on disk are ignored.
    pub fn open(
        pm: &dyn PersistenceManager,
        path: impl AsRef<Path>,
        page_size: usize,
        cache: Arc<PageCache>,
        committed: TxnId,
        read_only: bool,
    ) -> Result<Self> {
        let path = path.as_ref();
        let file = pm.open_file(path, !read_only)?;
        let page_count = file.size()? / Page::record_size(page_size) as u64;
        tracing::debug!(path = %path.display(), page_count, %committed, read_only, "opened page store");
        Ok(Self::with_file(
            path, file, page_size, cache, page_count, committed, read_only,
        ))
    }

    fn with_file(
        path: &Path,
        file: Box<dyn StorageFile>,
        page_size: usize,
        cache: Arc<PageCache>,
        page_count: u64,
        committed: TxnId,
        read_only: bool,
    ) -> Self {
        Self {
            path: path.to_path_buf(),
            partition: if read_only {
                format!("{}@{}", path.display(), committed.0)
            } else {
                path.to_string_lossy().into_owned()
            },
            file: Mutex::new(file),
            cache,
            page_size,
            page_count: AtomicU64::new(page_count),
            committed: AtomicU64::new(committed.0),
            dirty: Mutex::new(DirtySet::default()),
            read_only,
        }
    }

    // ========================================================================
    // Public API: Allocate and read pages
    // ========================================================================

    /// Allocate a new zeroed page, writeable by `txn`.
    ///
    /// The page is appended to the file's logical extent and joins the
    /// dirty set; it reaches disk on the next [`commit`](Self::commit).
    pub fn create(&self, txn: TxnId) -> Result<Arc<Page>> {
        self.check_writable()?;
        let mut dirty = self.dirty.lock();
        dirty.claim(txn)?;

        let page_id = PageId::new(self.page_count.fetch_add(1, Ordering::SeqCst));
        let page = Arc::new(Page::new(page_id, self.page_size, txn));
        dirty.pages.insert(page_id, page.clone());
        self.cache.insert_or_update(&self.partition, page.clone());

        tracing::trace!(page = page_id.0, %txn, "created page");
        Ok(page)
    }

    /// Fetch a page.
    ///
    /// Dirty pages of the active transaction win, then the cache, then
    /// the file. With `txn` set, the page must have a generation visible
    /// to that transaction.
    ///
    /// # Errors
    /// - `Error::PageNotFound` if the page was never allocated
    /// - `Error::SnapshotUnavailable` if no generation is visible to `txn`
    /// - I/O errors from the read
    pub fn retrieve(&self, page_id: PageId, txn: Option<TxnId>) -> Result<Arc<Page>> {
        let page = self.fetch(page_id)?;
        if txn.is_some() {
            page.visible_slot(txn)?;
        }
        Ok(page)
    }

    /// Make `page` writeable by `txn`.
    ///
    /// Returns the page unchanged if `txn` already holds it; otherwise the
    /// current generation is copied into the other buffer, which is
    /// stamped with `txn`. The page joins the dirty set.
    ///
    /// # Errors
    /// Returns `Error::InvalidOperation` on a read-only store or when
    /// another transaction is writing.
    pub fn get_writeable_page(&self, txn: TxnId, page: &Arc<Page>) -> Result<Arc<Page>> {
        self.check_writable()?;
        let mut dirty = self.dirty.lock();
        dirty.claim(txn)?;

        if page.upgrade(txn)? {
            tracing::trace!(page = page.id().0, %txn, "upgraded page");
        }
        dirty.pages.insert(page.id(), page.clone());
        self.cache.insert_or_update(&self.partition, page.clone());
        Ok(page.clone())
    }

    /// Record that a page must be flushed when `txn` commits.
    ///
    /// # Errors
    /// Returns `Error::InvalidOperation` if the page is not writeable for `txn`.
    pub fn mark_dirty(&self, txn: TxnId, page_id: PageId) -> Result<()> {
        self.check_writable()?;
        let mut dirty = self.dirty.lock();
        dirty.claim(txn)?;
        if dirty.pages.contains_key(&page_id) {
            return Ok(());
        }

        match self.cache.lookup(&self.partition, page_id) {
            Some(page) if page.is_writeable_for(txn) => {
                dirty.pages.insert(page_id, page);
                Ok(())
            }
            _ => Err(Error::invalid_op(format!(
                "{} is not writeable for {}",
                page_id, txn
            ))),
        }
    }

    /// Check whether some transaction holds `page` open for writing.
    pub fn is_writeable(&self, page: &Page) -> bool {
        page.is_writeable()
    }

    // ========================================================================
    // Public API: Commit and rollback
    // ========================================================================

    /// Flush all dirty pages of `txn` and call `on_committed` once they are
    /// durable.
    ///
    /// Both buffer slots of every page are written, then the file is
    /// synced. `on_committed` typically records the commit point; only
    /// after it succeeds does `txn` count as committed.
    ///
    /// # Errors
    /// - `Error::InvalidOperation` if another transaction owns the dirty set
    /// - I/O errors from the flush; the dirty pages are kept so nothing is lost
    /// - whatever `on_committed` returns; the flushed pages are then dropped
    ///   from the cache so their uncommitted slot is hidden again
    pub fn commit<F>(&self, txn: TxnId, on_committed: F) -> Result<()>
    where
        F: FnOnce(TxnId) -> Result<()>,
    {
        self.check_writable()?;
        let pages = {
            let mut dirty = self.dirty.lock();
            if matches!(dirty.txn, Some(owner) if owner != txn) {
                return Err(Error::invalid_op(format!(
                    "{} cannot commit pages owned by another transaction",
                    txn
                )));
            }
            std::mem::take(&mut dirty.pages)
        };

        if let Err(err) = self.flush(&pages) {
            tracing::warn!(%txn, error = %err, "page flush failed");
            let mut dirty = self.dirty.lock();
            dirty.pages.extend(pages);
            return Err(err);
        }

        for page in pages.values() {
            page.seal();
            self.cache.insert_or_update(&self.partition, page.clone());
        }
        self.dirty.lock().txn = None;

        if let Err(err) = on_committed(txn) {
            for page_id in pages.keys() {
                self.cache.remove(&self.partition, *page_id);
            }
            return Err(err);
        }

        self.committed.store(txn.0, Ordering::SeqCst);
        tracing::debug!(%txn, pages = pages.len(), "committed pages");
        Ok(())
    }

    /// Discard the dirty pages of `txn`.
    ///
    /// The pages are dropped from the cache so the next read loads the
    /// last flushed state; pages created by `txn` are released.
    pub fn rollback(&self, txn: TxnId) -> Result<()> {
        let mut dirty = self.dirty.lock();
        if matches!(dirty.txn, Some(owner) if owner != txn) {
            return Err(Error::invalid_op(format!(
                "{} cannot roll back pages owned by another transaction",
                txn
            )));
        }
        for page_id in dirty.pages.keys() {
            self.cache.remove(&self.partition, *page_id);
        }
        let discarded = dirty.pages.len();
        dirty.pages.clear();
        dirty.txn = None;

        let on_disk = self.file.lock().size()? / self.record_size() as u64;
        self.page_count.store(on_disk, Ordering::SeqCst);
        tracing::debug!(%txn, discarded, "rolled back pages");
        Ok(())
    }

    /// Cut the file back to `page_count` pages.
    ///
    /// Used on open to drop pages appended by a transaction whose commit
    /// point was never recorded.
    pub fn truncate(&self, page_count: u64) -> Result<()> {
        self.check_writable()?;
        let dirty = self.dirty.lock();
        if let Some(owner) = dirty.txn {
            return Err(Error::invalid_op(format!(
                "cannot truncate while {} is writing",
                owner
            )));
        }

        let current = self.page_count();
        if page_count >= current {
            return Ok(());
        }
        {
            let mut file = self.file.lock();
            file.set_size(page_count * self.record_size() as u64)?;
            file.sync()?;
        }
        for id in page_count..current {
            self.cache.remove(&self.partition, PageId::new(id));
        }
        self.page_count.store(page_count, Ordering::SeqCst);
        tracing::info!(from = current, to = page_count, "truncated page store");
        Ok(())
    }

    /// Blank every on-disk slot stamped after the last durable commit.
    ///
    /// A transaction whose commit point was never recorded leaves its
    /// slots behind. The next transaction reuses the same id, so those
    /// slots must be gone before it commits or they would turn visible.
    /// Returns the number of slots cleared.
    pub fn discard_uncommitted(&self) -> Result<u64> {
        self.check_writable()?;
        let dirty = self.dirty.lock();
        if let Some(owner) = dirty.txn {
            return Err(Error::invalid_op(format!(
                "cannot discard slots while {} is writing",
                owner
            )));
        }

        let committed = self.committed_txn();
        let record_size = self.record_size() as u64;
        let slot_len = (SlotHeader::SIZE + self.page_size) as u64;
        let blank = vec![0u8; slot_len as usize];
        let mut header = [0u8; SlotHeader::SIZE];
        let mut cleared = 0u64;

        let mut file = self.file.lock();
        let on_disk = file.size()? / record_size;
        for page in 0..on_disk {
            for slot in 0..2 {
                let offset = page * record_size + slot * slot_len;
                file.seek(SeekFrom::Start(offset))?;
                file.read_exact(&mut header)?;
                if SlotHeader::from_bytes(&header).txn > committed {
                    file.seek(SeekFrom::Start(offset))?;
                    file.write_all(&blank)?;
                    cleared += 1;
                }
            }
        }
        if cleared > 0 {
            file.sync()?;
            drop(file);
            self.cache.clear_partition(&self.partition);
            tracing::info!(%committed, cleared, "discarded uncommitted page slots");
        }
        Ok(cleared)
    }

    // ========================================================================
    // Public API: Info
    // ========================================================================

    /// Number of allocated pages, including pages created by the active
    /// transaction.
    pub fn page_count(&self) -> u64 {
        self.page_count.load(Ordering::SeqCst)
    }

    /// Logical page size.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Size in bytes of one on-disk page record.
    pub fn record_size(&self) -> usize {
        Page::record_size(self.page_size)
    }

    /// Transaction of the latest durable commit.
    pub fn committed_txn(&self) -> TxnId {
        TxnId::new(self.committed.load(Ordering::SeqCst))
    }

    /// Whether writes are rejected.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Path of the page file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The shared cache this store reads through.
    pub fn cache(&self) -> &Arc<PageCache> {
        &self.cache
    }

    // ========================================================================
    // Internal
    // ========================================================================

    fn check_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(Error::invalid_op(format!(
                "page store {} is read-only",
                self.path.display()
            )));
        }
        Ok(())
    }

    fn fetch(&self, page_id: PageId) -> Result<Arc<Page>> {
        if page_id.0 >= self.page_count() {
            return Err(Error::PageNotFound(page_id));
        }
        if let Some(page) = self.dirty.lock().pages.get(&page_id) {
            return Ok(page.clone());
        }
        if let Some(page) = self.cache.lookup(&self.partition, page_id) {
            return Ok(page);
        }

        let record_size = self.record_size();
        let mut record = vec![0u8; record_size];
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(page_id.file_offset(record_size)))?;
            file.read_exact(&mut record)?;
        }

        let page = Arc::new(Page::decode(
            page_id,
            self.page_size,
            &record,
            self.committed_txn(),
        )?);
        self.cache.insert_or_update(&self.partition, page.clone());
        Ok(page)
    }

    fn flush(&self, pages: &BTreeMap<PageId, Arc<Page>>) -> Result<()> {
        let record_size = self.record_size();
        let mut record = Vec::with_capacity(record_size);
        let mut file = self.file.lock();
        for (page_id, page) in pages {
            record.clear();
            page.encode(&mut record);
            file.seek(SeekFrom::Start(page_id.file_offset(record_size)))?;
            file.write_all(&record)?;
        }
        file.sync()
    }
}
