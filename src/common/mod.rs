//! Common types and utilities shared across stardb.
//!
//! This module contains fundamental primitives used throughout the codebase:
//! - Configuration constants and [`StoreConfig`](config::StoreConfig)
//! - Error types
//! - Identifiers (PageId, TxnId, ObjectId)

pub mod config;
pub mod error;
mod object_id;
mod page_id;
mod txn_id;

pub use error::{Error, Result};
pub use object_id::ObjectId;
pub use page_id::PageId;
pub use txn_id::TxnId;
