//! Configuration constants and store options.

use crate::common::{Error, Result};

/// Default logical size of a page in bytes (4KB).
///
/// This is the size of one buffer slot's data area. On disk every page
/// record holds two slots plus their headers, see
/// [`PageStore::record_size`](crate::storage::PageStore::record_size).
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Smallest page size a store may be configured with.
pub const MIN_PAGE_SIZE: usize = 512;

/// Default maximum fan-out of a B-tree node.
pub const DEFAULT_BTREE_ORDER: usize = 64;

/// Smallest usable B-tree order.
pub const MIN_BTREE_ORDER: usize = 3;

/// Default number of pages held by a shared page cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// Default number of id→offset slots in one location index container.
pub const DEFAULT_CONTAINER_CAPACITY: usize = 256;

/// Name of the master (commit log) file inside a store directory.
pub const MASTER_FILE_NAME: &str = "master.sdb";

/// Name of the page data file inside a store directory.
pub const DATA_FILE_NAME: &str = "data.sdb";

/// How object updates are written to the heap.
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceMode {
    /// Every object version is appended at the heap tail. All historical
    /// commit points stay readable.
    #[default]
    AppendOnly = 0,
    /// An object is overwritten in place while it fits its reserved
    /// capacity. Only the previous generation of each page stays readable.
    Rewrite = 1,
}

impl PersistenceMode {
    /// Convert from u8, returning `None` for unknown values.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PersistenceMode::AppendOnly),
            1 => Some(PersistenceMode::Rewrite),
            _ => None,
        }
    }
}

/// Kind of store recorded in the master file header.
#[repr(u8)]
#[non_exhaustive]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum StoreType {
    /// A regular store.
    #[default]
    Standard = 0,
}

impl StoreType {
    /// Convert from u8, returning `None` for unknown values.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(StoreType::Standard),
            _ => None,
        }
    }
}

/// Options for creating or opening a store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Logical page size in bytes. Must be a power of two.
    pub page_size: usize,

    /// Maximum fan-out of B-tree nodes created without an explicit order.
    pub btree_order: usize,

    /// How object updates hit the heap.
    pub persistence_mode: PersistenceMode,

    /// Capacity of the page cache created by [`Store::create`](crate::Store::create)
    /// and [`Store::open`](crate::Store::open) when no shared cache is supplied.
    pub cache_capacity: usize,

    /// Slots per location index container.
    pub container_capacity: usize,

    /// Kind of store.
    pub store_type: StoreType,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            btree_order: DEFAULT_BTREE_ORDER,
            persistence_mode: PersistenceMode::default(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            container_capacity: DEFAULT_CONTAINER_CAPACITY,
            store_type: StoreType::default(),
        }
    }
}

impl StoreConfig {
    /// Create a new config builder.
    pub fn builder() -> StoreConfigBuilder {
        StoreConfigBuilder::default()
    }

    /// Check that all options are usable.
    ///
    /// # Errors
    /// Returns `Error::Config` describing the first bad option.
    pub fn validate(&self) -> Result<()> {
        if !self.page_size.is_power_of_two() || self.page_size < MIN_PAGE_SIZE {
            return Err(Error::Config(format!(
                "page size {} must be a power of two >= {}",
                self.page_size, MIN_PAGE_SIZE
            )));
        }
        if self.btree_order < MIN_BTREE_ORDER {
            return Err(Error::Config(format!(
                "btree order {} must be >= {}",
                self.btree_order, MIN_BTREE_ORDER
            )));
        }
        if self.cache_capacity == 0 {
            return Err(Error::Config("cache capacity must be > 0".into()));
        }
        if self.container_capacity == 0 {
            return Err(Error::Config("container capacity must be > 0".into()));
        }
        Ok(())
    }
}

/// Builder for [`StoreConfig`].
#[derive(Default)]
pub struct StoreConfigBuilder {
    config: StoreConfig,
}

impl StoreConfigBuilder {
    /// Set the logical page size.
    pub fn page_size(mut self, size: usize) -> Self {
        self.config.page_size = size;
        self
    }

    /// Set the default B-tree order.
    pub fn btree_order(mut self, order: usize) -> Self {
        self.config.btree_order = order;
        self
    }

    /// Set the persistence mode.
    pub fn persistence_mode(mut self, mode: PersistenceMode) -> Self {
        self.config.persistence_mode = mode;
        self
    }

    /// Set the page cache capacity (in pages).
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.config.cache_capacity = capacity;
        self
    }

    /// Set the number of slots per location index container.
    pub fn container_capacity(mut self, capacity: usize) -> Self {
        self.config.container_capacity = capacity;
        self
    }

    /// Set the store type.
    pub fn store_type(mut self, store_type: StoreType) -> Self {
        self.config.store_type = store_type;
        self
    }

    pub fn build(self) -> StoreConfig {
        self.config
    }
}
