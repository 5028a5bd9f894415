//! Object location index - object id to heap offset.
//!
//! Object ids are handed out densely starting at 1, so the index is a
//! growable array of fixed-size containers rather than a general map:
//!
//! ```text
//!  ids 1..=C          ids C+1..=2C        ids 2C+1..=3C
//! ┌─────────────┐    ┌─────────────┐    ┌─────────────┐
//! │ Container 0 │    │ Container 1 │    │ Container 2 │  ...
//! └─────────────┘    └─────────────┘    └─────────────┘
//! ```
//!
//! An id's container is fixed by the id alone, so updating an id never
//! moves it. Containers are persisted as heap records when they change.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::common::{Error, ObjectId, Result};

/// Where an object's current record lives and which commit wrote it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub offset: u64,
    pub generation: u64,
}

/// A fixed-size block of location slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    slots: Vec<Option<Location>>,
}

impl Container {
    fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots.
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}

/// In-memory view of every container, plus which ones changed since the
/// last commit.
#[derive(Debug)]
pub struct LocationIndex {
    container_capacity: usize,
    containers: Vec<Container>,
    /// Heap offset of each container's last saved record.
    saved_at: Vec<Option<u64>>,
    dirty: BTreeSet<usize>,
}

impl LocationIndex {
    pub fn new(container_capacity: usize) -> Self {
        Self {
            container_capacity,
            containers: Vec::new(),
            saved_at: Vec::new(),
            dirty: BTreeSet::new(),
        }
    }

    /// Rebuild from containers loaded at `offsets`.
    ///
    /// # Errors
    /// Returns `Error::Corruption` if a container has the wrong size.
    pub fn from_saved(container_capacity: usize, saved: Vec<(u64, Container)>) -> Result<Self> {
        if container_capacity == 0 {
            return Err(Error::corruption("location index with zero-slot containers"));
        }
        let mut index = Self::new(container_capacity);
        for (position, (offset, container)) in saved.into_iter().enumerate() {
            if container.capacity() != container_capacity {
                return Err(Error::corruption(format!(
                    "container {} holds {} slots, expected {}",
                    position,
                    container.capacity(),
                    container_capacity
                )));
            }
            index.containers.push(container);
            index.saved_at.push(Some(offset));
        }
        Ok(index)
    }

    /// Container that holds `id`.
    pub fn container_for(&self, id: ObjectId) -> usize {
        (id.0.saturating_sub(1) / self.container_capacity as u64) as usize
    }

    fn slot_for(&self, id: ObjectId) -> usize {
        (id.0.saturating_sub(1) % self.container_capacity as u64) as usize
    }

    /// Insert or update the location of `id`.
    ///
    /// `container_hint`, when given, must name the container the id maps
    /// to. Only the next container may be appended.
    ///
    /// # Errors
    /// Returns `Error::InvalidOperation` for the null id, a wrong hint, or
    /// an id past the next container.
    pub fn set_object_offset(
        &mut self,
        id: ObjectId,
        offset: u64,
        container_hint: Option<usize>,
        generation: u64,
    ) -> Result<()> {
        if id.is_null() {
            return Err(Error::invalid_op("cannot index the null object id"));
        }
        let container = self.container_for(id);
        if let Some(hint) = container_hint {
            if hint != container {
                return Err(Error::invalid_op(format!(
                    "{} belongs in container {}, not {}",
                    id, container, hint
                )));
            }
        }

        self.ensure_container(container)?;

        let slot = self.slot_for(id);
        self.containers[container].slots[slot] = Some(Location { offset, generation });
        self.dirty.insert(container);
        Ok(())
    }

    /// Make sure the container holding `id` exists, appending it if it
    /// is the next one.
    ///
    /// # Errors
    /// Returns `Error::InvalidOperation` if `id` lies past the next container.
    pub fn reserve(&mut self, id: ObjectId) -> Result<usize> {
        let container = self.container_for(id);
        self.ensure_container(container)?;
        Ok(container)
    }

    fn ensure_container(&mut self, container: usize) -> Result<()> {
        if container > self.containers.len() {
            return Err(Error::invalid_op(format!(
                "container {} is past the next container {}",
                container,
                self.containers.len()
            )));
        }
        if container == self.containers.len() {
            tracing::trace!(container, "adding location container");
            self.containers.push(Container::new(self.container_capacity));
            self.saved_at.push(None);
            self.dirty.insert(container);
        }
        Ok(())
    }

    /// Heap offset of `id`, if it has one.
    pub fn get_object_offset(&self, id: ObjectId) -> Option<u64> {
        self.get_location(id).map(|location| location.offset)
    }

    pub fn get_location(&self, id: ObjectId) -> Option<Location> {
        if id.is_null() {
            return None;
        }
        self.containers
            .get(self.container_for(id))
            .and_then(|container| container.slots[self.slot_for(id)])
    }

    /// Forget `id`, returning its last location.
    pub fn remove(&mut self, id: ObjectId) -> Option<Location> {
        if id.is_null() {
            return None;
        }
        let container = self.container_for(id);
        let slot = self.slot_for(id);
        let removed = self.containers.get_mut(container)?.slots[slot].take();
        if removed.is_some() {
            self.dirty.insert(container);
        }
        removed
    }

    pub fn number_of_containers(&self) -> usize {
        self.containers.len()
    }

    pub fn container_capacity(&self) -> usize {
        self.container_capacity
    }

    /// Containers changed since they were last saved.
    pub fn dirty_containers(&self) -> impl Iterator<Item = (usize, &Container)> + '_ {
        self.dirty.iter().map(|&index| (index, &self.containers[index]))
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Offset of the last saved record of a container.
    pub fn saved_offset(&self, container: usize) -> Option<u64> {
        self.saved_at.get(container).copied().flatten()
    }

    /// Record that a container was written at `offset`.
    pub fn mark_saved(&mut self, container: usize, offset: u64) {
        self.saved_at[container] = Some(offset);
        self.dirty.remove(&container);
    }

    /// Offsets of every container, in container order.
    ///
    /// # Errors
    /// Returns `Error::InvalidOperation` if a container was never saved.
    pub fn container_offsets(&self) -> Result<Vec<u64>> {
        self.saved_at
            .iter()
            .enumerate()
            .map(|(index, offset)| {
                offset.ok_or_else(|| Error::invalid_op(format!("container {} was never saved", index)))
            })
            .collect()
    }
}
