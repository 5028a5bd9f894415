//! Master file header layout.

use uuid::Uuid;

use crate::common::config::{PersistenceMode, StoreConfig, StoreType};
use crate::common::{Error, Result};

/// Store identity and persisted options, written once at the start of the
/// master file.
///
/// # Layout (64 bytes)
/// ```text
/// ┌──────────┬─────────┬────────────┬──────────────┬──────┬──────┬─────┬───────────┬─────┬───────┐
/// │  magic   │ version │  store_id  │ store_set_id │ type │ mode │ pad │ page_size │ pad │ crc32 │
/// │   (8)    │   (4)   │    (16)    │     (16)     │ (1)  │ (1)  │ (2) │    (4)    │ (8) │  (4)  │
/// └──────────┴─────────┴────────────┴──────────────┴──────┴──────┴─────┴───────────┴─────┴───────┘
/// ```
/// All integers are little-endian. The CRC covers bytes `0..60`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasterHeader {
    pub store_id: Uuid,
    pub store_set_id: Uuid,
    pub store_type: StoreType,
    pub persistence_mode: PersistenceMode,
    pub page_size: u32,
}

impl MasterHeader {
    pub const SIZE: usize = 64;
    pub const MAGIC: [u8; 8] = *b"STARDBMF";
    pub const VERSION: u32 = 1;

    const OFFSET_MAGIC: usize = 0;
    const OFFSET_VERSION: usize = 8;
    const OFFSET_STORE_ID: usize = 12;
    const OFFSET_STORE_SET_ID: usize = 28;
    const OFFSET_STORE_TYPE: usize = 44;
    const OFFSET_MODE: usize = 45;
    const OFFSET_PAGE_SIZE: usize = 48;
    const OFFSET_CHECKSUM: usize = 60;

    /// Header for a brand-new store with a fresh store id.
    pub fn new(config: &StoreConfig, store_set_id: Uuid) -> Self {
        Self {
            store_id: Uuid::new_v4(),
            store_set_id,
            store_type: config.store_type,
            persistence_mode: config.persistence_mode,
            page_size: config.page_size as u32,
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[Self::OFFSET_MAGIC..Self::OFFSET_MAGIC + 8].copy_from_slice(&Self::MAGIC);
        buf[Self::OFFSET_VERSION..Self::OFFSET_VERSION + 4]
            .copy_from_slice(&Self::VERSION.to_le_bytes());
        buf[Self::OFFSET_STORE_ID..Self::OFFSET_STORE_ID + 16]
            .copy_from_slice(self.store_id.as_bytes());
        buf[Self::OFFSET_STORE_SET_ID..Self::OFFSET_STORE_SET_ID + 16]
            .copy_from_slice(self.store_set_id.as_bytes());
        buf[Self::OFFSET_STORE_TYPE] = self.store_type as u8;
        buf[Self::OFFSET_MODE] = self.persistence_mode as u8;
        buf[Self::OFFSET_PAGE_SIZE..Self::OFFSET_PAGE_SIZE + 4]
            .copy_from_slice(&self.page_size.to_le_bytes());

        let crc = crc32fast::hash(&buf[..Self::OFFSET_CHECKSUM]);
        buf[Self::OFFSET_CHECKSUM..].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Parse and validate a header.
    ///
    /// # Errors
    /// Returns `Error::Corruption` for a wrong magic, an unsupported
    /// version, a checksum mismatch or an unknown enum value.
    pub fn from_bytes(buf: &[u8; Self::SIZE]) -> Result<Self> {
        if buf[Self::OFFSET_MAGIC..Self::OFFSET_MAGIC + 8] != Self::MAGIC {
            return Err(Error::corruption("not a master file (bad magic)"));
        }

        let stored = u32::from_le_bytes(read_array(buf, Self::OFFSET_CHECKSUM));
        if stored != crc32fast::hash(&buf[..Self::OFFSET_CHECKSUM]) {
            return Err(Error::corruption("master file header checksum mismatch"));
        }

        let version = u32::from_le_bytes(read_array(buf, Self::OFFSET_VERSION));
        if version != Self::VERSION {
            return Err(Error::corruption(format!(
                "unsupported master file version {}",
                version
            )));
        }

        let store_type = StoreType::from_u8(buf[Self::OFFSET_STORE_TYPE]).ok_or_else(|| {
            Error::corruption(format!("unknown store type {}", buf[Self::OFFSET_STORE_TYPE]))
        })?;
        let persistence_mode = PersistenceMode::from_u8(buf[Self::OFFSET_MODE]).ok_or_else(|| {
            Error::corruption(format!("unknown persistence mode {}", buf[Self::OFFSET_MODE]))
        })?;

        Ok(Self {
            store_id: Uuid::from_bytes(read_array(buf, Self::OFFSET_STORE_ID)),
            store_set_id: Uuid::from_bytes(read_array(buf, Self::OFFSET_STORE_SET_ID)),
            store_type,
            persistence_mode,
            page_size: u32::from_le_bytes(read_array(buf, Self::OFFSET_PAGE_SIZE)),
        })
    }
}

/// Copy `N` bytes starting at `offset`.
pub(super) fn read_array<const N: usize>(buf: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[offset..offset + N]);
    out
}
