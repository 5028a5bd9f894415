//! Error types for stardb.

use thiserror::Error;

use crate::common::{ObjectId, PageId, TxnId};

/// Convenient Result type alias.
///
/// Instead of writing `Result<T, Error>` everywhere, we can write `Result<T>`.
pub type Result<T> = std::result::Result<T, Error>;

/// All possible errors in the storage core.
///
/// Errors fall into four groups:
/// - programming errors (`InvalidOperation`, `DuplicateKey`), never retried
/// - storage corruption that could not be healed (`Corruption`)
/// - I/O failures (`Io`), fatal at this layer
/// - lookups of ids that do not exist (`PageNotFound`, `ObjectNotFound`)
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from disk operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The caller broke a usage rule, e.g. wrote to a page that was
    /// never upgraded for its transaction.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// The key is already present in the B-tree.
    #[error("Duplicate key: {0}")]
    DuplicateKey(u64),

    /// Requested page does not exist in the page store.
    #[error("{0} not found")]
    PageNotFound(PageId),

    /// Requested object has no location in the object index.
    #[error("{0} not found")]
    ObjectNotFound(ObjectId),

    /// Both buffers of a page were written after the reader's transaction.
    #[error("{page} has no generation visible to {txn}")]
    SnapshotUnavailable { page: PageId, txn: TxnId },

    /// On-disk data failed validation and could not be recovered.
    #[error("Corruption detected: {0}")]
    Corruption(String),

    /// Encoding or decoding of a persisted object failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Invalid store configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Shorthand for building an [`Error::InvalidOperation`].
    pub(crate) fn invalid_op(msg: impl Into<String>) -> Self {
        Error::InvalidOperation(msg.into())
    }

    /// Shorthand for building an [`Error::Corruption`].
    pub(crate) fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::PageNotFound(PageId::new(42));
        assert_eq!(format!("{}", err), "Page(42) not found");

        let err = Error::DuplicateKey(7);
        assert_eq!(format!("{}", err), "Duplicate key: 7");

        let err = Error::SnapshotUnavailable {
            page: PageId::new(3),
            txn: TxnId::new(9),
        };
        assert_eq!(format!("{}", err), "Page(3) has no generation visible to Txn(9)");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();

        match err {
            Error::Io(_) => {} // Success
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_io_error_has_source() {
        use std::error::Error as _;

        let err: Error = std::io::Error::new(std::io::ErrorKind::Other, "boom").into();
        assert!(err.source().is_some());
        assert!(Error::invalid_op("nope").source().is_none());
    }
}
