//! Buffer slot header.
//!
//! Every buffer slot of an on-disk page record starts with a
//! [`SlotHeader`] containing:
//! - the id of the transaction that wrote the slot
//! - a CRC32 checksum over the header and the slot data

use crate::common::TxnId;

/// Metadata stored in front of each buffer slot on disk.
///
/// # Layout (16 bytes)
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 0       8     txn (TxnId, little-endian)
/// 8       4     checksum (CRC32, little-endian)
/// 12      4     reserved (zero)
/// ```
///
/// # Checksum
/// The checksum is computed over the header with the checksum field set
/// to zero, followed by the slot data. A slot whose checksum does not
/// match was torn by an interrupted write.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SlotHeader {
    /// Transaction that wrote this slot.
    pub txn: TxnId,
    /// CRC32 checksum of header and data.
    pub checksum: u32,
}

impl SlotHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = 16;

    /// Offset of each field within the header.
    pub const OFFSET_TXN: usize = 0;
    pub const OFFSET_CHECKSUM: usize = 8;

    /// Build a header for `data` written by `txn`, with its checksum filled in.
    pub fn for_data(txn: TxnId, data: &[u8]) -> Self {
        Self {
            txn,
            checksum: Self::compute_checksum(txn, data),
        }
    }

    /// Read a header from the beginning of a byte slice.
    ///
    /// # Panics
    /// Panics if `data.len() < SlotHeader::SIZE`.
    pub fn from_bytes(data: &[u8]) -> Self {
        assert!(data.len() >= Self::SIZE, "buffer too small for SlotHeader");

        let mut txn = [0u8; 8];
        txn.copy_from_slice(&data[Self::OFFSET_TXN..Self::OFFSET_TXN + 8]);
        let mut checksum = [0u8; 4];
        checksum.copy_from_slice(&data[Self::OFFSET_CHECKSUM..Self::OFFSET_CHECKSUM + 4]);

        Self {
            txn: TxnId::new(u64::from_le_bytes(txn)),
            checksum: u32::from_le_bytes(checksum),
        }
    }

    /// Write this header to the beginning of a byte slice.
    ///
    /// # Panics
    /// Panics if `data.len() < SlotHeader::SIZE`.
    pub fn write_to(&self, data: &mut [u8]) {
        assert!(data.len() >= Self::SIZE, "buffer too small for SlotHeader");

        data[Self::OFFSET_TXN..Self::OFFSET_TXN + 8].copy_from_slice(&self.txn.0.to_le_bytes());
        data[Self::OFFSET_CHECKSUM..Self::OFFSET_CHECKSUM + 4]
            .copy_from_slice(&self.checksum.to_le_bytes());
        data[Self::OFFSET_CHECKSUM + 4..Self::SIZE].fill(0);
    }

    /// Compute the CRC32 checksum of a slot.
    pub fn compute_checksum(txn: TxnId, data: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&txn.0.to_le_bytes());
        // checksum field and reserved bytes hash as zeros
        hasher.update(&[0u8; 8]);
        hasher.update(data);
        hasher.finalize()
    }

    /// Verify that the stored checksum matches `data`.
    ///
    /// A slot that was never written (all zeros, including the header)
    /// is accepted.
    pub fn verify(&self, data: &[u8]) -> bool {
        if self.txn == TxnId::NONE && self.checksum == 0 && data.iter().all(|&b| b == 0) {
            return true;
        }
        self.checksum == Self::compute_checksum(self.txn, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_header_roundtrip() {
        let original = SlotHeader {
            txn: TxnId::new(0x1234_5678_9ABC_DEF0),
            checksum: 0xDEAD_BEEF,
        };

        let mut buffer = [0xFFu8; SlotHeader::SIZE];
        original.write_to(&mut buffer);

        assert_eq!(SlotHeader::from_bytes(&buffer), original);
        assert_eq!(&buffer[12..16], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_slot_header_byte_layout() {
        let header = SlotHeader {
            txn: TxnId::new(0x0807_0605_0403_0201),
            checksum: 0x0403_0201,
        };

        let mut buffer = [0u8; SlotHeader::SIZE];
        header.write_to(&mut buffer);

        assert_eq!(buffer[0], 0x01); // txn byte 0 (LSB)
        assert_eq!(buffer[7], 0x08); // txn byte 7 (MSB)
        assert_eq!(buffer[8], 0x01); // checksum byte 0 (LSB)
        assert_eq!(buffer[11], 0x04); // checksum byte 3 (MSB)
    }

    #[test]
    fn test_checksum_verify() {
        let mut data = vec![0u8; 512];
        data[100] = 0xAB;

        let header = SlotHeader::for_data(TxnId::new(3), &data);
        assert!(header.verify(&data));

        // Corrupt the data
        data[100] = 0xFF;
        assert!(!header.verify(&data));
    }

    #[test]
    fn test_checksum_covers_txn() {
        let data = vec![7u8; 64];
        let header = SlotHeader::for_data(TxnId::new(3), &data);
        let forged = SlotHeader {
            txn: TxnId::new(4),
            checksum: header.checksum,
        };
        assert!(!forged.verify(&data));
    }

    #[test]
    fn test_unwritten_slot_is_valid() {
        let data = vec![0u8; 64];
        assert!(SlotHeader::default().verify(&data));
    }
}
