//! Page Cache - the process-wide page caching layer.
//!
//! The [`PageCache`] provides:
//! - Partitioned keys so several page stores can share one cache
//! - Global least-recently-used eviction across all partitions
//! - Eviction hooks that can veto evicting a particular page

use std::sync::atomic::Ordering;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::{Mutex, RwLock};

use crate::buffer::CacheStats;
use crate::common::PageId;
use crate::storage::page::Page;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    partition: String,
    page_id: PageId,
}

impl CacheKey {
    fn new(partition: &str, page_id: PageId) -> Self {
        Self {
            partition: partition.to_owned(),
            page_id,
        }
    }
}

/// Describes a page about to be evicted. A hook calls
/// [`cancel`](EvictionEvent::cancel) to keep the page cached.
#[derive(Debug)]
pub struct EvictionEvent<'a> {
    partition: &'a str,
    page_id: PageId,
    cancelled: bool,
}

impl<'a> EvictionEvent<'a> {
    /// Partition the candidate page belongs to.
    pub fn partition(&self) -> &str {
        self.partition
    }

    /// Id of the candidate page.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Keep this page in the cache. The next least-recently-used page
    /// is offered instead.
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    /// Whether a hook vetoed the eviction.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}

/// Callback invoked before a page is evicted.
///
/// Hooks run while the cache is locked and must not call back into it.
pub type EvictionHook = Box<dyn Fn(&mut EvictionEvent<'_>) + Send + Sync>;

/// Shared LRU cache of pages, keyed by `(partition, page id)`.
///
/// # Architecture
/// ```text
/// ┌────────────────────────────────────────────────────────┐
/// │                       PageCache                        │
/// │  ┌───────────────────────────────────────────────┐     │
/// │  │ LruCache<(partition, PageId), Arc<Page>>      │     │
/// │  │  MRU ... ... ... ... ... ... ... ... ... LRU  │     │
/// │  └───────────────────────────────────────────────┘     │
/// │  ┌──────────────┐   ┌───────────────┐                  │
/// │  │ hooks (veto) │   │  CacheStats   │                  │
/// │  └──────────────┘   └───────────────┘                  │
/// └────────────────────────────────────────────────────────┘
/// ```
///
/// # Thread Safety
/// - `entries`: `Mutex`, every lookup updates recency
/// - `hooks`: `RwLock`, registered rarely, read on every eviction
/// - `stats`: atomic counters
///
/// # Capacity
/// Inserting a new key into a full cache evicts the least-recently-used
/// page whose eviction no hook vetoes. Overwriting an existing key never
/// evicts. If every page is vetoed the insert still succeeds and the
/// cache runs over capacity; later inserts evict until it is back
/// within capacity.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use stardb::{Page, PageCache, PageId, TxnId};
///
/// let cache = PageCache::new(2);
/// let page = Arc::new(Page::new(PageId::new(0), 512, TxnId::new(1)));
/// cache.insert_or_update("store-a", page);
///
/// assert!(cache.lookup("store-a", PageId::new(0)).is_some());
/// assert!(cache.lookup("store-b", PageId::new(0)).is_none());
/// ```
pub struct PageCache {
    entries: Mutex<LruCache<CacheKey, Arc<Page>>>,
    hooks: RwLock<Vec<EvictionHook>>,
    stats: CacheStats,
    capacity: usize,
}

impl PageCache {
    /// Create a cache holding up to `capacity` pages.
    ///
    /// # Panics
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be > 0");
        Self {
            entries: Mutex::new(LruCache::unbounded()),
            hooks: RwLock::new(Vec::new()),
            stats: CacheStats::new(),
            capacity,
        }
    }

    /// Register a hook that runs before each eviction.
    pub fn add_eviction_hook<F>(&self, hook: F)
    where
        F: Fn(&mut EvictionEvent<'_>) + Send + Sync + 'static,
    {
        self.hooks.write().push(Box::new(hook));
    }

    /// Insert a page, or replace the cached page with the same key.
    ///
    /// Replacing refreshes recency and never evicts.
    pub fn insert_or_update(&self, partition: &str, page: Arc<Page>) {
        let key = CacheKey::new(partition, page.id());
        let mut entries = self.entries.lock();

        if entries.contains(&key) {
            entries.put(key, page);
            return;
        }

        while entries.len() >= self.capacity {
            if !self.evict_one(&mut entries) {
                break;
            }
        }
        entries.put(key, page);
        self.stats.inserts.fetch_add(1, Ordering::Relaxed);
    }

    /// Look up a page, marking it most recently used.
    pub fn lookup(&self, partition: &str, page_id: PageId) -> Option<Arc<Page>> {
        let key = CacheKey::new(partition, page_id);
        let found = self.entries.lock().get(&key).cloned();
        let counter = if found.is_some() {
            &self.stats.hits
        } else {
            &self.stats.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Drop one page from the cache, bypassing eviction hooks.
    pub fn remove(&self, partition: &str, page_id: PageId) -> Option<Arc<Page>> {
        self.entries.lock().pop(&CacheKey::new(partition, page_id))
    }

    /// Drop every page of one partition.
    pub fn clear_partition(&self, partition: &str) {
        let mut entries = self.entries.lock();
        let keys: Vec<CacheKey> = entries
            .iter()
            .filter(|(key, _)| key.partition == partition)
            .map(|(key, _)| key.clone())
            .collect();
        for key in keys {
            entries.pop(&key);
        }
    }

    /// Drop every page.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of cached pages.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache holds no pages.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Cache statistics.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Evict the least-recently-used page no hook vetoes. Returns false
    /// when every candidate was vetoed.
    fn evict_one(&self, entries: &mut LruCache<CacheKey, Arc<Page>>) -> bool {
        let hooks = self.hooks.read();
        let victim = entries
            .iter()
            .rev()
            .map(|(key, _)| key)
            .find(|key| {
                let mut event = EvictionEvent {
                    partition: &key.partition,
                    page_id: key.page_id,
                    cancelled: false,
                };
                for hook in hooks.iter() {
                    hook(&mut event);
                }
                if event.cancelled {
                    self.stats.cancelled_evictions.fetch_add(1, Ordering::Relaxed);
                }
                !event.cancelled
            })
            .cloned();

        match victim {
            Some(key) => {
                entries.pop(&key);
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(partition = %key.partition, page = key.page_id.0, "evicted page");
                true
            }
            None => {
                tracing::debug!(len = entries.len(), "every eviction candidate vetoed; cache over capacity");
                false
            }
        }
    }
}

impl Default for PageCache {
    fn default() -> Self {
        Self::new(crate::common::config::DEFAULT_CACHE_CAPACITY)
    }
}
