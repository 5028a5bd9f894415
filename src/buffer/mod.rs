//! Page caching.
//!
//! The page cache is the in-memory layer between page stores and disk.
//! One cache is shared by every open page store in the process; each
//! store uses its own partition key so page ids never collide.
//!
//! # Components
//! - [`PageCache`] - Partitioned LRU cache with cancellable eviction
//! - [`EvictionEvent`] - Passed to eviction hooks, which may veto eviction
//! - [`CacheStats`] - Performance statistics

mod page_cache;
mod stats;

pub use page_cache::{EvictionEvent, EvictionHook, PageCache};
pub use stats::{CacheStats, StatsSnapshot};
