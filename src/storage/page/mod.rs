//! Page types and layout.
//!
//! This module contains:
//! - [`Page`] - The dual-buffer unit of storage
//! - [`Slot`] - Selector for one of a page's two buffers
//! - [`SlotHeader`] - Metadata stored in front of each buffer on disk

#[allow(clippy::module_inception)]
mod page;
mod slot_header;

pub use page::{Page, Slot};
pub use slot_header::SlotHeader;
