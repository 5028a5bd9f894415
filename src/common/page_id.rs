//! Page identifier type.

use std::fmt;

/// Identifies a page in a page store.
///
/// Page ids are dense: the store hands them out in allocation order
/// starting from zero, and a page's position in the data file is
/// derived from its id alone.
///
/// # Example
/// ```
/// use stardb::PageId;
///
/// let (page, pos) = PageId::locate(1300, 512);
/// assert_eq!(page, PageId::new(2));
/// assert_eq!(pos, 276);
/// assert_eq!(page.file_offset(1056), 2112);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(pub u64);

impl PageId {
    /// Create a new PageId.
    #[inline]
    pub fn new(id: u64) -> Self {
        PageId(id)
    }

    /// Byte offset of this page's record in a file of `record_size`
    /// records.
    #[inline]
    pub fn file_offset(self, record_size: usize) -> u64 {
        self.0 * record_size as u64
    }

    /// Page holding logical byte `offset` of a space cut into pages of
    /// `page_size` bytes, and the position inside that page.
    #[inline]
    pub fn locate(offset: u64, page_size: u64) -> (PageId, usize) {
        (PageId(offset / page_size), (offset % page_size) as usize)
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Page({})", self.0)
    }
}
