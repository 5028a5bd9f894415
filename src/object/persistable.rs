//! Serialization contract for stored objects.

use std::io::{Read, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::Result;

/// An object the object store can persist.
///
/// `save` writes the object's bytes and returns how many were written.
/// `offset` is the heap offset the bytes will land at, for formats that
/// embed self-relative positions. `read` rebuilds the object from the
/// bytes `save` produced.
///
/// Every `serde` type gets an implementation backed by `bincode`.
pub trait Persistable: Sized {
    fn save(&self, writer: &mut dyn Write, offset: u64) -> Result<usize>;

    fn read(reader: &mut dyn Read) -> Result<Self>;
}

impl<T> Persistable for T
where
    T: Serialize + DeserializeOwned,
{
    fn save(&self, writer: &mut dyn Write, _offset: u64) -> Result<usize> {
        let bytes = bincode::serialize(self)?;
        writer.write_all(&bytes)?;
        Ok(bytes.len())
    }

    fn read(reader: &mut dyn Read) -> Result<Self> {
        Ok(bincode::deserialize_from(reader)?)
    }
}
