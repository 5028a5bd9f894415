//! Transaction identifier type.

use std::fmt;

/// Identifies a write transaction.
///
/// Transaction ids increase monotonically and double as commit numbers:
/// the transaction that produces commit point `N` runs as `TxnId(N)`.
/// Every page buffer is stamped with the id of the transaction that
/// last wrote it, so a reader pinned to a transaction can pick the
/// generation that was current at that time.
///
/// `TxnId(0)` stamps a buffer that has never been written.
///
/// # Example
/// ```
/// use stardb::TxnId;
///
/// let txn = TxnId::new(5);
/// assert_eq!(txn.next(), TxnId::new(6));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TxnId(pub u64);

impl TxnId {
    /// Stamp of a buffer slot that no transaction has written.
    pub const NONE: TxnId = TxnId(0);

    /// Create a new TxnId.
    #[inline]
    pub fn new(id: u64) -> Self {
        TxnId(id)
    }

    /// The transaction id that follows this one.
    #[inline]
    pub fn next(&self) -> Self {
        TxnId(self.0 + 1)
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Txn({})", self.0)
    }
}
