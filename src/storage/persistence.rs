//! Persistence manager - the file system seam.
//!
//! The page store and master file never touch `std::fs` directly. They
//! go through a [`PersistenceManager`], which hands out seekable
//! [`StorageFile`] streams. [`FilePersistenceManager`] is the standard
//! implementation on top of the local file system.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, Write};
use std::path::Path;

use crate::common::Result;

/// A seekable, readable and writable file handed out by a
/// [`PersistenceManager`].
pub trait StorageFile: Read + Write + Seek + Send {
    /// Current length of the file in bytes.
    fn size(&self) -> Result<u64>;

    /// Truncate or extend the file to `len` bytes.
    fn set_size(&mut self, len: u64) -> Result<()>;

    /// Flush file contents and metadata to stable storage.
    fn sync(&mut self) -> Result<()>;
}

impl StorageFile for File {
    fn size(&self) -> Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn set_size(&mut self, len: u64) -> Result<()> {
        self.set_len(len)?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.sync_all()?;
        Ok(())
    }
}

/// File and directory operations the storage core relies on.
pub trait PersistenceManager: Send + Sync {
    /// Check whether a file exists.
    fn file_exists(&self, path: &Path) -> bool;

    /// Create a new, empty file opened for reading and writing.
    ///
    /// # Errors
    /// Fails if the file already exists.
    fn create_file(&self, path: &Path) -> Result<Box<dyn StorageFile>>;

    /// Open an existing file. `writable` selects read-write or read-only.
    fn open_file(&self, path: &Path, writable: bool) -> Result<Box<dyn StorageFile>>;

    /// Remove a file.
    fn delete_file(&self, path: &Path) -> Result<()>;

    /// Check whether a directory exists.
    fn directory_exists(&self, path: &Path) -> bool;

    /// Create a directory and any missing parents.
    fn create_directory(&self, path: &Path) -> Result<()>;
}

/// [`PersistenceManager`] backed by the local file system.
#[derive(Debug, Default, Clone, Copy)]
pub struct FilePersistenceManager;

impl FilePersistenceManager {
    pub fn new() -> Self {
        FilePersistenceManager
    }
}

impl PersistenceManager for FilePersistenceManager {
    fn file_exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn create_file(&self, path: &Path) -> Result<Box<dyn StorageFile>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        Ok(Box::new(file))
    }

    fn open_file(&self, path: &Path, writable: bool) -> Result<Box<dyn StorageFile>> {
        let file = OpenOptions::new().read(true).write(writable).open(path)?;
        Ok(Box::new(file))
    }

    fn delete_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path)?;
        Ok(())
    }

    fn directory_exists(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn create_directory(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)?;
        Ok(())
    }
}
