//! Object store - typed objects addressed by id.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::common::config::PersistenceMode;
use crate::common::{Error, ObjectId, Result, TxnId};
use crate::storage::PageStore;

use super::heap::{ObjectHeap, RecordHeader};
use super::location_index::{Container, LocationIndex};
use super::persistable::Persistable;

/// Everything needed to reopen the object store at a commit. Written as
/// the last heap record of every commit; the commit point records its
/// offset.
#[derive(Debug, Serialize, Deserialize)]
struct StoreState {
    next_object_id: u64,
    container_capacity: u64,
    container_offsets: Vec<u64>,
}

/// Loads and saves [`Persistable`] objects by [`ObjectId`].
///
/// Objects are heap records; the [`LocationIndex`] maps each id to its
/// current record. How an update is written depends on the
/// [`PersistenceMode`]:
/// - `AppendOnly`: always a new record at the heap tail
/// - `Rewrite`: in place when the new bytes fit the reserved capacity
pub struct ObjectStore {
    heap: ObjectHeap,
    index: LocationIndex,
    mode: PersistenceMode,
    next_object_id: u64,
    /// Transaction the next writes belong to.
    txn: TxnId,
    /// Snapshot reads are pinned to this transaction.
    reader: Option<TxnId>,
    read_only: bool,
}

impl ObjectStore {
    /// An empty object store over a fresh page store.
    pub fn new(pages: Arc<PageStore>, mode: PersistenceMode, container_capacity: usize) -> Self {
        let txn = pages.committed_txn().next();
        let read_only = pages.is_read_only();
        Self {
            heap: ObjectHeap::new(pages, 0),
            index: LocationIndex::new(container_capacity),
            mode,
            next_object_id: 1,
            txn,
            reader: None,
            read_only,
        }
    }

    /// Reload the object store from the state record at `state_offset`.
    ///
    /// `reader` pins page reads to a snapshot transaction; `None` reads
    /// the latest committed bytes.
    pub fn load(
        pages: Arc<PageStore>,
        mode: PersistenceMode,
        state_offset: u64,
        reader: Option<TxnId>,
    ) -> Result<Self> {
        let txn = pages.committed_txn().next();
        let read_only = pages.is_read_only();
        let extent = pages.page_count() * pages.page_size() as u64;
        let mut heap = ObjectHeap::new(pages, extent);

        let (header, payload) = heap.read_record(reader, state_offset)?;
        if !header.object_id.is_null() {
            return Err(Error::corruption(format!(
                "expected store state at {}, found {}",
                state_offset, header.object_id
            )));
        }
        let state = StoreState::read(&mut payload.as_slice())?;

        let mut containers = Vec::with_capacity(state.container_offsets.len());
        for &offset in &state.container_offsets {
            let (_, bytes) = heap.read_record(reader, offset)?;
            containers.push((offset, Container::read(&mut bytes.as_slice())?));
        }
        let index = LocationIndex::from_saved(state.container_capacity as usize, containers)?;
        heap.set_tail(state_offset + header.record_len());

        tracing::debug!(
            state_offset,
            tail = heap.tail(),
            containers = index.number_of_containers(),
            next_object_id = state.next_object_id,
            "loaded object store"
        );
        Ok(Self {
            heap,
            index,
            mode,
            next_object_id: state.next_object_id,
            txn,
            reader,
            read_only,
        })
    }

    /// Hand out a new object id. Ids start at 1 and are never reused.
    pub fn allocate_id(&mut self) -> Result<ObjectId> {
        self.check_writable()?;
        let id = ObjectId::new(self.next_object_id);
        // Ids may be saved out of order, so the container exists up front.
        self.index.reserve(id)?;
        self.next_object_id += 1;
        Ok(id)
    }

    /// Persist `object` under `id`, returning its heap offset.
    ///
    /// # Errors
    /// Returns `Error::InvalidOperation` if `id` was never allocated or
    /// the store is read-only.
    pub fn save_object<T: Persistable>(&mut self, id: ObjectId, object: &T) -> Result<u64> {
        self.check_writable()?;
        if id.is_null() || id.0 >= self.next_object_id {
            return Err(Error::invalid_op(format!("{} was not allocated", id)));
        }

        let in_place = match (self.mode, self.index.get_location(id)) {
            (PersistenceMode::Rewrite, Some(location)) => Some(location.offset),
            _ => None,
        };

        let mut payload = Vec::new();
        let target = in_place.unwrap_or(self.heap.tail());
        object.save(&mut payload, target + RecordHeader::SIZE as u64)?;

        let offset = match in_place {
            Some(offset) if self.heap.rewrite(self.txn, offset, id, &payload)? => offset,
            _ => {
                if in_place.is_some() {
                    payload.clear();
                    object.save(&mut payload, self.heap.tail() + RecordHeader::SIZE as u64)?;
                }
                let capacity = self.capacity_for(payload.len());
                self.heap.append(self.txn, id, &payload, capacity)?
            }
        };

        self.index.set_object_offset(id, offset, None, self.txn.0)?;
        tracing::trace!(object = id.0, offset, len = payload.len(), "saved object");
        Ok(offset)
    }

    /// Load the object stored under `id`.
    ///
    /// # Errors
    /// - `Error::ObjectNotFound` if `id` has no location
    /// - `Error::Corruption` if the record does not belong to `id`
    pub fn load_object<T: Persistable>(&self, id: ObjectId) -> Result<T> {
        let offset = self
            .index
            .get_object_offset(id)
            .ok_or(Error::ObjectNotFound(id))?;
        let (header, payload) = self.heap.read_record(self.reader, offset)?;
        if header.object_id != id {
            return Err(Error::corruption(format!(
                "record at {} belongs to {}, expected {}",
                offset, header.object_id, id
            )));
        }
        T::read(&mut payload.as_slice())
    }

    /// Drop `id` from the index. Its record stays in the heap.
    pub fn delete_object(&mut self, id: ObjectId) -> Result<()> {
        self.check_writable()?;
        self.index.remove(id).map(|_| ()).ok_or(Error::ObjectNotFound(id))
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.index.get_object_offset(id).is_some()
    }

    /// Write dirty containers and the store state. Returns the state
    /// record's offset, which the commit point records.
    pub fn write_commit_state(&mut self) -> Result<u64> {
        self.check_writable()?;

        let dirty: Vec<(usize, Container)> = self
            .index
            .dirty_containers()
            .map(|(index, container)| (index, container.clone()))
            .collect();
        for (index, container) in dirty {
            let mut bytes = Vec::new();
            container.save(&mut bytes, self.heap.tail())?;

            let in_place = match self.mode {
                PersistenceMode::Rewrite => self.index.saved_offset(index),
                PersistenceMode::AppendOnly => None,
            };
            let offset = match in_place {
                Some(offset) if self.heap.rewrite(self.txn, offset, ObjectId::NULL, &bytes)? => offset,
                _ => {
                    let capacity = self.capacity_for(bytes.len());
                    self.heap.append(self.txn, ObjectId::NULL, &bytes, capacity)?
                }
            };
            self.index.mark_saved(index, offset);
        }

        let state = StoreState {
            next_object_id: self.next_object_id,
            container_capacity: self.index.container_capacity() as u64,
            container_offsets: self.index.container_offsets()?,
        };
        let mut bytes = Vec::new();
        state.save(&mut bytes, self.heap.tail())?;
        let offset = self.heap.append(self.txn, ObjectId::NULL, &bytes, bytes.len())?;
        tracing::debug!(txn = %self.txn, offset, "wrote store state");
        Ok(offset)
    }

    /// The current transaction committed; later writes belong to the next.
    pub(crate) fn advance(&mut self, committed: TxnId) {
        self.txn = committed.next();
    }

    /// Transaction the next writes belong to.
    pub fn txn(&self) -> TxnId {
        self.txn
    }

    pub fn persistence_mode(&self) -> PersistenceMode {
        self.mode
    }

    pub fn location_index(&self) -> &LocationIndex {
        &self.index
    }

    pub fn heap(&self) -> &ObjectHeap {
        &self.heap
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Payload bytes to reserve for a record of `len` bytes.
    fn capacity_for(&self, len: usize) -> usize {
        match self.mode {
            PersistenceMode::AppendOnly => len,
            PersistenceMode::Rewrite => len + len / 4,
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(Error::invalid_op("object store is a read-only snapshot"));
        }
        Ok(())
    }
}
