//! Object heap - variable-length records laid over fixed-size pages.

use std::sync::Arc;

use crate::common::{Error, ObjectId, PageId, Result, TxnId};
use crate::storage::PageStore;

/// Header in front of every heap record.
///
/// # Layout (24 bytes)
/// ```text
/// ┌───────────┬─────────┬──────────┬───────┬─────┐
/// │ object_id │ length  │ capacity │ crc32 │ pad │
/// │    (8)    │   (4)   │   (4)    │  (4)  │ (4) │
/// └───────────┴─────────┴──────────┴───────┴─────┘
/// ```
/// `capacity` bytes follow the header; the first `length` of them are the
/// payload. The CRC covers the object id and the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub object_id: ObjectId,
    pub length: u32,
    pub capacity: u32,
    pub checksum: u32,
}

impl RecordHeader {
    pub const SIZE: usize = 24;

    const OFFSET_OBJECT_ID: usize = 0;
    const OFFSET_LENGTH: usize = 8;
    const OFFSET_CAPACITY: usize = 12;
    const OFFSET_CHECKSUM: usize = 16;

    fn new(object_id: ObjectId, payload: &[u8], capacity: u32) -> Self {
        Self {
            object_id,
            length: payload.len() as u32,
            capacity,
            checksum: Self::compute_checksum(object_id, payload),
        }
    }

    fn compute_checksum(object_id: ObjectId, payload: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&object_id.0.to_le_bytes());
        hasher.update(payload);
        hasher.finalize()
    }

    fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[Self::OFFSET_OBJECT_ID..Self::OFFSET_OBJECT_ID + 8]
            .copy_from_slice(&self.object_id.0.to_le_bytes());
        buf[Self::OFFSET_LENGTH..Self::OFFSET_LENGTH + 4].copy_from_slice(&self.length.to_le_bytes());
        buf[Self::OFFSET_CAPACITY..Self::OFFSET_CAPACITY + 4]
            .copy_from_slice(&self.capacity.to_le_bytes());
        buf[Self::OFFSET_CHECKSUM..Self::OFFSET_CHECKSUM + 4]
            .copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &[u8; Self::SIZE]) -> Self {
        let u32_at = |at: usize| u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
        let mut id = [0u8; 8];
        id.copy_from_slice(&buf[Self::OFFSET_OBJECT_ID..Self::OFFSET_OBJECT_ID + 8]);
        Self {
            object_id: ObjectId::new(u64::from_le_bytes(id)),
            length: u32_at(Self::OFFSET_LENGTH),
            capacity: u32_at(Self::OFFSET_CAPACITY),
            checksum: u32_at(Self::OFFSET_CHECKSUM),
        }
    }

    /// Bytes the whole record occupies in the heap.
    pub fn record_len(&self) -> u64 {
        Self::SIZE as u64 + self.capacity as u64
    }
}

/// A contiguous byte space over the pages of one [`PageStore`].
///
/// Heap offset `o` lives in page `o / page_size` at position
/// `o % page_size`; records freely cross page boundaries. The heap is the
/// only allocator of pages, so the page count always covers `tail`.
pub struct ObjectHeap {
    pages: Arc<PageStore>,
    page_size: u64,
    /// First free byte.
    tail: u64,
}

impl ObjectHeap {
    pub fn new(pages: Arc<PageStore>, tail: u64) -> Self {
        let page_size = pages.page_size() as u64;
        Self {
            pages,
            page_size,
            tail,
        }
    }

    pub fn tail(&self) -> u64 {
        self.tail
    }

    /// Move the tail, e.g. once the committed end of the heap is known.
    pub(crate) fn set_tail(&mut self, tail: u64) {
        self.tail = tail;
    }

    /// Pages needed to hold everything below the tail.
    pub fn pages_in_use(&self) -> u64 {
        self.tail.div_ceil(self.page_size)
    }

    pub fn page_store(&self) -> &Arc<PageStore> {
        &self.pages
    }

    /// Write a record at the tail, reserving `capacity` payload bytes.
    /// Returns the record's offset.
    pub fn append(
        &mut self,
        txn: TxnId,
        object_id: ObjectId,
        payload: &[u8],
        capacity: usize,
    ) -> Result<u64> {
        let capacity = capacity.max(payload.len());
        let header = RecordHeader::new(object_id, payload, to_u32(capacity)?);
        let offset = self.tail;

        let mut record = Vec::with_capacity(RecordHeader::SIZE + capacity);
        record.extend_from_slice(&header.to_bytes());
        record.extend_from_slice(payload);
        record.resize(RecordHeader::SIZE + capacity, 0);

        self.write_bytes(txn, offset, &record)?;
        self.tail = offset + record.len() as u64;
        Ok(offset)
    }

    /// Overwrite the record at `offset` in place if `payload` fits its
    /// capacity. Returns `false` (writing nothing) when it does not fit.
    pub fn rewrite(
        &mut self,
        txn: TxnId,
        offset: u64,
        object_id: ObjectId,
        payload: &[u8],
    ) -> Result<bool> {
        let existing = self.read_header(None, offset)?;
        if payload.len() > existing.capacity as usize {
            return Ok(false);
        }
        let header = RecordHeader::new(object_id, payload, existing.capacity);
        let mut record = Vec::with_capacity(RecordHeader::SIZE + payload.len());
        record.extend_from_slice(&header.to_bytes());
        record.extend_from_slice(payload);
        self.write_bytes(txn, offset, &record)?;
        Ok(true)
    }

    /// Read the record header at `offset`.
    pub fn read_header(&self, reader: Option<TxnId>, offset: u64) -> Result<RecordHeader> {
        let mut buf = [0u8; RecordHeader::SIZE];
        self.read_bytes(reader, offset, &mut buf)?;
        Ok(RecordHeader::from_bytes(&buf))
    }

    /// Read and verify the record at `offset`.
    ///
    /// # Errors
    /// Returns `Error::Corruption` if the record's checksum fails or its
    /// length runs past the tail.
    pub fn read_record(&self, reader: Option<TxnId>, offset: u64) -> Result<(RecordHeader, Vec<u8>)> {
        let header = self.read_header(reader, offset)?;
        if header.length > header.capacity || offset + header.record_len() > self.tail {
            return Err(Error::corruption(format!(
                "heap record at {} has bad length {}/{}",
                offset, header.length, header.capacity
            )));
        }

        let mut payload = vec![0u8; header.length as usize];
        self.read_bytes(reader, offset + RecordHeader::SIZE as u64, &mut payload)?;
        if RecordHeader::compute_checksum(header.object_id, &payload) != header.checksum {
            return Err(Error::corruption(format!(
                "heap record at {} ({}) failed its checksum",
                offset, header.object_id
            )));
        }
        Ok((header, payload))
    }

    fn read_bytes(&self, reader: Option<TxnId>, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut done = 0;
        while done < buf.len() {
            let at = offset + done as u64;
            let (page_id, pos) = self.locate(at);
            let n = (self.page_size as usize - pos).min(buf.len() - done);
            let page = self.pages.retrieve(page_id, reader)?;
            page.read(reader, pos, &mut buf[done..done + n])?;
            done += n;
        }
        Ok(())
    }

    fn write_bytes(&mut self, txn: TxnId, offset: u64, data: &[u8]) -> Result<()> {
        let mut done = 0;
        while done < data.len() {
            let at = offset + done as u64;
            let (page_id, pos) = self.locate(at);
            let n = (self.page_size as usize - pos).min(data.len() - done);

            let page = if page_id.0 == self.pages.page_count() {
                self.pages.create(txn)?
            } else {
                let page = self.pages.retrieve(page_id, None)?;
                self.pages.get_writeable_page(txn, &page)?
            };
            if page.id() != page_id {
                return Err(Error::corruption(format!(
                    "heap expected {} but the page store allocated {}",
                    page_id,
                    page.id()
                )));
            }
            page.write(txn, pos, &data[done..done + n])?;
            self.pages.mark_dirty(txn, page_id)?;
            done += n;
        }
        Ok(())
    }

    fn locate(&self, offset: u64) -> (PageId, usize) {
        PageId::locate(offset, self.page_size)
    }
}

fn to_u32(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| Error::invalid_op(format!("object of {} bytes is too large", len)))
}
