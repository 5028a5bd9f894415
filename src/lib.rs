//! stardb - the storage core of a triple store.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            Store                                │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────┐    │
//! │  │              Index Layer (index/)                       │    │
//! │  │        BTree: nodes addressed by object id              │    │
//! │  └─────────────────────────────────────────────────────────┘    │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐    │
//! │  │              Object Layer (object/)                     │    │
//! │  │   ObjectStore + LocationIndex + ObjectHeap              │    │
//! │  └─────────────────────────────────────────────────────────┘    │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐    │
//! │  │              Page Cache (buffer/)                       │    │
//! │  │   Shared LRU, partitioned per page file, vetoable       │    │
//! │  └─────────────────────────────────────────────────────────┘    │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐    │
//! │  │              Storage Layer (storage/)                   │    │
//! │  │   PageStore + dual-buffer Page + MasterFile commit log  │    │
//! │  └─────────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//! - [`common`] - Shared primitives (PageId, TxnId, ObjectId, Error, config)
//! - [`storage`] - Files, dual-buffer pages, the page store and master file
//! - [`buffer`] - The shared page cache
//! - [`object`] - Typed objects on pages, located by id
//! - [`index`] - Index structures (B-tree)
//!
//! # Quick Start
//! ```no_run
//! use stardb::{FilePersistenceManager, Store, StoreConfig};
//! use uuid::Uuid;
//!
//! let pm = FilePersistenceManager::new();
//! let mut store = Store::create(&pm, "my_store", StoreConfig::default()).unwrap();
//!
//! let mut tree = store.create_btree::<String>().unwrap();
//! tree.insert(store.objects_mut(), 1, "first".into()).unwrap();
//! tree.save(store.objects_mut()).unwrap();
//! let commit = store.commit(Uuid::new_v4()).unwrap();
//!
//! // Later: reopen at the latest commit and find the tree by id.
//! let store = Store::open(&pm, "my_store", StoreConfig::default()).unwrap();
//! let tree = store.open_btree::<String>(tree.id()).unwrap();
//! assert_eq!(tree.len(), 1);
//! # let _ = commit;
//! ```

pub mod buffer;
pub mod common;
pub mod index;
pub mod object;
pub mod storage;
mod store;

pub use common::config::{PersistenceMode, StoreConfig, StoreType, DEFAULT_PAGE_SIZE};
pub use common::{Error, ObjectId, PageId, Result, TxnId};

pub use buffer::{CacheStats, EvictionEvent, PageCache, StatsSnapshot};
pub use index::btree::{BTree, Entry, Node};
pub use object::{ObjectStore, Persistable};
pub use storage::page::{Page, Slot};
pub use storage::{
    CommitPoint, FilePersistenceManager, MasterFile, PageStore, PersistenceManager, StorageFile,
};
pub use store::Store;
