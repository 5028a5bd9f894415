//! Object layer - typed objects on top of the page store.
//!
//! # Components
//! - [`Persistable`] - How an object turns into bytes and back
//! - [`ObjectHeap`] - Variable-length records laid over pages
//! - [`LocationIndex`] - Object id to heap offset, in fixed-size containers
//! - [`ObjectStore`] - Load and save objects by id; writes the commit state

mod heap;
mod location_index;
mod object_store;
mod persistable;

pub use heap::{ObjectHeap, RecordHeader};
pub use location_index::{Container, Location, LocationIndex};
pub use object_store::ObjectStore;
pub use persistable::Persistable;
