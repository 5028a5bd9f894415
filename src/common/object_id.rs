//! Object identifier type.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies a persisted object (a B-tree node, a tree header, ...).
///
/// Object ids are allocated densely starting at 1 and are resolved to a
/// heap offset through the location index. Objects refer to each other
/// only by id, never by address.
///
/// # Example
/// ```
/// use stardb::ObjectId;
///
/// assert!(ObjectId::NULL.is_null());
/// assert!(!ObjectId::new(1).is_null());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

impl ObjectId {
    /// The null reference. Never allocated.
    pub const NULL: ObjectId = ObjectId(0);

    /// Create a new ObjectId.
    #[inline]
    pub fn new(id: u64) -> Self {
        ObjectId(id)
    }

    /// Check if this is the null reference.
    #[inline]
    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "Object(NULL)")
        } else {
            write!(f, "Object({})", self.0)
        }
    }
}
