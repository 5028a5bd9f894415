//! Storage layer - files, page formats and the commit log.
//!
//! This module handles persistent storage:
//! - [`persistence`] - The file system seam ([`PersistenceManager`])
//! - [`page`] - Dual-buffer pages and their on-disk slot format
//! - [`PageStore`] - Page allocation, copy-on-write upgrade and flush
//! - [`MasterFile`] - Store identity and the append-only commit point log

mod master_file;
pub mod page;
mod page_store;
pub mod persistence;

pub use master_file::{CommitPoint, MasterFile, MasterHeader, RecoveryReport};
pub use page_store::PageStore;
pub use persistence::{FilePersistenceManager, PersistenceManager, StorageFile};
