//! Page - the dual-buffer unit of storage.
//!
//! A [`Page`] holds two copies ("generations") of its bytes, each stamped
//! with the transaction that wrote it. Readers pick the newest generation
//! their transaction is allowed to see; a writer copies that generation
//! into the other buffer and modifies the copy. This gives readers a
//! stable snapshot of exactly one prior generation while a write is in
//! flight.

use parking_lot::RwLock;

use crate::common::{Error, PageId, Result, TxnId};

use super::slot_header::SlotHeader;

/// Selects one of the two buffers of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    First,
    Second,
}

impl Slot {
    /// The opposite buffer.
    #[inline]
    pub fn other(self) -> Slot {
        match self {
            Slot::First => Slot::Second,
            Slot::Second => Slot::First,
        }
    }
}

/// One generation of a page's bytes.
#[derive(Debug, Clone)]
struct Generation {
    /// Transaction that wrote these bytes.
    txn: TxnId,
    data: Box<[u8]>,
    /// Set on load when the slot failed its checksum or was stamped by a
    /// transaction that never committed. Such a slot is never read and is
    /// the first to be overwritten.
    hidden: bool,
}

impl Generation {
    fn empty(page_size: usize) -> Self {
        Self {
            txn: TxnId::NONE,
            data: vec![0u8; page_size].into_boxed_slice(),
            hidden: false,
        }
    }
}

#[derive(Debug)]
struct Buffers {
    first: Generation,
    second: Generation,
    /// Slot currently open for writing and the transaction that owns it.
    writer: Option<(Slot, TxnId)>,
}

impl Buffers {
    fn get(&self, slot: Slot) -> &Generation {
        match slot {
            Slot::First => &self.first,
            Slot::Second => &self.second,
        }
    }

    fn get_mut(&mut self, slot: Slot) -> &mut Generation {
        match slot {
            Slot::First => &mut self.first,
            Slot::Second => &mut self.second,
        }
    }

    /// Newest intact generation stamped at or before `reader`
    /// (any generation when `reader` is `None`).
    fn visible(&self, reader: Option<TxnId>) -> Option<Slot> {
        let candidate = |slot: Slot| {
            let gen = self.get(slot);
            let visible = !gen.hidden && reader.map_or(true, |r| gen.txn <= r);
            visible.then_some((gen.txn, slot))
        };
        match (candidate(Slot::First), candidate(Slot::Second)) {
            (Some((a, first)), Some((b, second))) => Some(if b > a { second } else { first }),
            (Some((_, slot)), None) | (None, Some((_, slot))) => Some(slot),
            (None, None) => None,
        }
    }
}

/// A fixed-size page with two transaction-stamped buffers.
///
/// # Layout on disk
/// ```text
/// ┌─────────────┬──────────────────┬─────────────┬──────────────────┐
/// │ SlotHeader  │ first data       │ SlotHeader  │ second data      │
/// │ (16 bytes)  │ (page_size)      │ (16 bytes)  │ (page_size)      │
/// └─────────────┴──────────────────┴─────────────┴──────────────────┘
/// ```
///
/// # Thread Safety
/// Both buffers sit behind one `RwLock`. Readers and the single writer
/// each touch a different slot, so contention is limited to the short
/// critical sections of individual reads and writes.
///
/// # Example
/// ```
/// use stardb::{Page, PageId, TxnId};
///
/// let page = Page::new(PageId::new(0), 512, TxnId::new(1));
/// page.write(TxnId::new(1), 0, b"abc").unwrap();
///
/// let mut buf = [0u8; 3];
/// page.read(None, 0, &mut buf).unwrap();
/// assert_eq!(&buf, b"abc");
/// ```
#[derive(Debug)]
pub struct Page {
    id: PageId,
    page_size: usize,
    buffers: RwLock<Buffers>,
}

impl Page {
    /// Create a new zeroed page, writeable by `txn`.
    pub fn new(id: PageId, page_size: usize, txn: TxnId) -> Self {
        let mut first = Generation::empty(page_size);
        first.txn = txn;
        Self {
            id,
            page_size,
            buffers: RwLock::new(Buffers {
                first,
                second: Generation::empty(page_size),
                writer: Some((Slot::First, txn)),
            }),
        }
    }

    /// Size of an on-disk page record holding both slots.
    #[inline]
    pub const fn record_size(page_size: usize) -> usize {
        2 * (SlotHeader::SIZE + page_size)
    }

    /// Get the page id.
    #[inline]
    pub fn id(&self) -> PageId {
        self.id
    }

    /// Get the logical page size.
    #[inline]
    pub fn size(&self) -> usize {
        self.page_size
    }

    /// Check whether some transaction holds this page open for writing.
    pub fn is_writeable(&self) -> bool {
        self.buffers.read().writer.is_some()
    }

    /// Check whether `txn` holds this page open for writing.
    pub fn is_writeable_for(&self, txn: TxnId) -> bool {
        matches!(self.buffers.read().writer, Some((_, owner)) if owner == txn)
    }

    /// Transaction stamps of the two slots, first then second.
    pub fn generations(&self) -> (TxnId, TxnId) {
        let buffers = self.buffers.read();
        (buffers.first.txn, buffers.second.txn)
    }

    /// Slot a reader at `reader` would see.
    ///
    /// # Errors
    /// Returns `Error::SnapshotUnavailable` if both slots are newer than
    /// the reader (or hidden).
    pub fn visible_slot(&self, reader: Option<TxnId>) -> Result<Slot> {
        self.buffers.read().visible(reader).ok_or(Error::SnapshotUnavailable {
            page: self.id,
            txn: reader.unwrap_or(TxnId::NONE),
        })
    }

    /// Copy bytes from the generation visible to `reader` into `buf`.
    pub fn read(&self, reader: Option<TxnId>, offset: usize, buf: &mut [u8]) -> Result<()> {
        self.check_bounds(offset, buf.len())?;
        let buffers = self.buffers.read();
        let slot = buffers.visible(reader).ok_or(Error::SnapshotUnavailable {
            page: self.id,
            txn: reader.unwrap_or(TxnId::NONE),
        })?;
        buf.copy_from_slice(&buffers.get(slot).data[offset..offset + buf.len()]);
        Ok(())
    }

    /// Write bytes into the slot held open by `txn`.
    ///
    /// # Errors
    /// Returns `Error::InvalidOperation` if the page was not upgraded for
    /// `txn` (see [`PageStore::get_writeable_page`](crate::storage::PageStore::get_writeable_page)),
    /// or if the write runs past the end of the page.
    pub fn write(&self, txn: TxnId, offset: usize, data: &[u8]) -> Result<()> {
        self.check_bounds(offset, data.len())?;
        let mut buffers = self.buffers.write();
        match buffers.writer {
            Some((slot, owner)) if owner == txn => {
                buffers.get_mut(slot).data[offset..offset + data.len()].copy_from_slice(data);
                Ok(())
            }
            _ => Err(Error::invalid_op(format!(
                "{} is not writeable for {}",
                self.id, txn
            ))),
        }
    }

    /// Open the page for writing by `txn`.
    ///
    /// Copies the generation visible to `txn` into the other slot and
    /// stamps that slot with `txn`. Returns `false` if the page was
    /// already writeable for `txn`.
    pub(crate) fn upgrade(&self, txn: TxnId) -> Result<bool> {
        let mut buffers = self.buffers.write();
        match buffers.writer {
            Some((_, owner)) if owner == txn => return Ok(false),
            Some((_, owner)) => {
                return Err(Error::invalid_op(format!(
                    "{} is already writeable for {}",
                    self.id, owner
                )))
            }
            None => {}
        }

        let source = buffers.visible(Some(txn)).ok_or(Error::SnapshotUnavailable {
            page: self.id,
            txn,
        })?;
        let target = source.other();
        let copy = buffers.get(source).data.clone();
        let gen = buffers.get_mut(target);
        gen.data = copy;
        gen.txn = txn;
        gen.hidden = false;
        buffers.writer = Some((target, txn));
        Ok(true)
    }

    /// Close the write slot after its transaction committed.
    pub(crate) fn seal(&self) {
        self.buffers.write().writer = None;
    }

    /// Encode both slots into an on-disk page record.
    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        let buffers = self.buffers.read();
        for gen in [&buffers.first, &buffers.second] {
            let start = out.len();
            out.resize(start + SlotHeader::SIZE, 0);
            SlotHeader::for_data(gen.txn, &gen.data).write_to(&mut out[start..]);
            out.extend_from_slice(&gen.data);
        }
    }

    /// Decode a page record read from disk. The page starts out
    /// non-writeable.
    ///
    /// A slot with a bad checksum was torn by an interrupted write; a slot
    /// stamped after `committed` belongs to a transaction whose commit
    /// point was never recorded. Both are kept but hidden from readers.
    /// If neither slot is readable the page is corrupt, unless both were
    /// written after `committed`, in which case they are out of reach for
    /// a reader at `committed`.
    ///
    /// # Panics
    /// Panics if `record` is not exactly `record_size(page_size)` bytes.
    pub(crate) fn decode(
        id: PageId,
        page_size: usize,
        record: &[u8],
        committed: TxnId,
    ) -> Result<Self> {
        assert_eq!(record.len(), Self::record_size(page_size), "bad page record size");

        let slot_len = SlotHeader::SIZE + page_size;
        let decode_slot = |name: &str, bytes: &[u8]| {
            let header = SlotHeader::from_bytes(bytes);
            let data = &bytes[SlotHeader::SIZE..];
            let torn = !header.verify(data);
            let uncommitted = header.txn > committed;
            if torn {
                tracing::warn!(page = id.0, slot = name, txn = header.txn.0, "torn page slot ignored");
            } else if uncommitted {
                tracing::debug!(page = id.0, slot = name, txn = header.txn.0, "uncommitted page slot ignored");
            }
            let slot = Generation {
                txn: header.txn,
                data: data.to_vec().into_boxed_slice(),
                hidden: torn || uncommitted,
            };
            (slot, torn)
        };
        let (first, first_torn) = decode_slot("first", &record[..slot_len]);
        let (second, second_torn) = decode_slot("second", &record[slot_len..]);

        if first.hidden && second.hidden {
            // Two commits newer than `committed` replaced both buffers.
            if !first_torn && !second_torn {
                return Err(Error::SnapshotUnavailable { page: id, txn: committed });
            }
            return Err(Error::corruption(format!("{} has no readable buffer", id)));
        }

        Ok(Self {
            id,
            page_size,
            buffers: RwLock::new(Buffers {
                first,
                second,
                writer: None,
            }),
        })
    }

    fn check_bounds(&self, offset: usize, len: usize) -> Result<()> {
        if offset + len > self.page_size {
            return Err(Error::invalid_op(format!(
                "access of {} bytes at {} overruns {} ({} bytes)",
                len, offset, self.id, self.page_size
            )));
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
