//! Commit point records.
//!
//! Each commit point is stored twice, as a primary and a shadow half of
//! identical bytes. A crash while appending can tear at most the half
//! being written; the other half still carries the commit point.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::header::read_array;

/// A durable commit: where the store state of commit `commit_number`
/// lives, when it happened and which job produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitPoint {
    /// Monotonic commit number; also the transaction id of the commit.
    pub commit_number: u64,
    /// Heap offset of the store-state record written by this commit.
    pub location_offset: u64,
    /// Commit time, millisecond precision.
    pub timestamp: DateTime<Utc>,
    /// Caller-supplied id of the job that committed.
    pub job_id: Uuid,
}

impl CommitPoint {
    /// Commit point stamped with the current time.
    pub fn new(commit_number: u64, location_offset: u64, job_id: Uuid) -> Self {
        Self::at(commit_number, location_offset, Utc::now(), job_id)
    }

    /// Commit point with an explicit timestamp, truncated to milliseconds
    /// so it survives a round trip through the file unchanged.
    pub fn at(
        commit_number: u64,
        location_offset: u64,
        timestamp: DateTime<Utc>,
        job_id: Uuid,
    ) -> Self {
        let timestamp =
            DateTime::from_timestamp_millis(timestamp.timestamp_millis()).unwrap_or_default();
        Self {
            commit_number,
            location_offset,
            timestamp,
            job_id,
        }
    }
}

/// One half of a commit record.
///
/// # Layout (64 bytes)
/// ```text
/// ┌────────┬─────┬───────────────┬────────────┬─────────────┬────────┬─────┬───────┐
/// │ marker │ pad │ commit_number │   offset   │ timestamp   │ job_id │ pad │ crc32 │
/// │  (4)   │ (4) │      (8)      │    (8)     │ (8, millis) │  (16)  │(12) │  (4)  │
/// └────────┴─────┴───────────────┴────────────┴─────────────┴────────┴─────┴───────┘
/// ```
pub(super) struct RecordHalf;

impl RecordHalf {
    pub const SIZE: usize = 64;
    pub const MARKER: u32 = 0x5054_4D43; // "CMTP"

    const OFFSET_MARKER: usize = 0;
    const OFFSET_COMMIT: usize = 8;
    const OFFSET_LOCATION: usize = 16;
    const OFFSET_TIMESTAMP: usize = 24;
    const OFFSET_JOB_ID: usize = 32;
    const OFFSET_CHECKSUM: usize = 60;

    pub fn encode(point: &CommitPoint) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[Self::OFFSET_MARKER..Self::OFFSET_MARKER + 4]
            .copy_from_slice(&Self::MARKER.to_le_bytes());
        buf[Self::OFFSET_COMMIT..Self::OFFSET_COMMIT + 8]
            .copy_from_slice(&point.commit_number.to_le_bytes());
        buf[Self::OFFSET_LOCATION..Self::OFFSET_LOCATION + 8]
            .copy_from_slice(&point.location_offset.to_le_bytes());
        buf[Self::OFFSET_TIMESTAMP..Self::OFFSET_TIMESTAMP + 8]
            .copy_from_slice(&point.timestamp.timestamp_millis().to_le_bytes());
        buf[Self::OFFSET_JOB_ID..Self::OFFSET_JOB_ID + 16].copy_from_slice(point.job_id.as_bytes());

        let crc = crc32fast::hash(&buf[..Self::OFFSET_CHECKSUM]);
        buf[Self::OFFSET_CHECKSUM..].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decode one half; `None` if the marker, checksum or timestamp is bad.
    pub fn decode(buf: &[u8]) -> Option<CommitPoint> {
        if buf.len() != Self::SIZE {
            return None;
        }
        if u32::from_le_bytes(read_array(buf, Self::OFFSET_MARKER)) != Self::MARKER {
            return None;
        }
        let stored = u32::from_le_bytes(read_array(buf, Self::OFFSET_CHECKSUM));
        if stored != crc32fast::hash(&buf[..Self::OFFSET_CHECKSUM]) {
            return None;
        }

        let millis = i64::from_le_bytes(read_array(buf, Self::OFFSET_TIMESTAMP));
        Some(CommitPoint {
            commit_number: u64::from_le_bytes(read_array(buf, Self::OFFSET_COMMIT)),
            location_offset: u64::from_le_bytes(read_array(buf, Self::OFFSET_LOCATION)),
            timestamp: DateTime::from_timestamp_millis(millis)?,
            job_id: Uuid::from_bytes(read_array(buf, Self::OFFSET_JOB_ID)),
        })
    }
}

/// Size of a full record (primary + shadow).
pub(super) const RECORD_SIZE: usize = 2 * RecordHalf::SIZE;

/// Which half of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Half {
    Primary,
    Shadow,
}

impl Half {
    /// Byte offset of this half within a record.
    pub fn offset(self) -> usize {
        match self {
            Half::Primary => 0,
            Half::Shadow => RecordHalf::SIZE,
        }
    }
}

/// Outcome of validating one on-disk record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum RecordState {
    /// Both halves intact and identical.
    Valid(CommitPoint),
    /// One half is damaged; the point comes from the other.
    HalfCorrupt { point: CommitPoint, damaged: Half },
    /// Neither half can be read.
    FullyCorrupt,
}

impl RecordState {
    /// Validate a record. A short slice (a partial append) is fully corrupt.
    pub fn classify(record: &[u8]) -> Self {
        if record.len() != RECORD_SIZE {
            return RecordState::FullyCorrupt;
        }
        let primary = RecordHalf::decode(&record[..RecordHalf::SIZE]);
        let shadow = RecordHalf::decode(&record[RecordHalf::SIZE..]);
        match (primary, shadow) {
            (Some(p), Some(s)) if p == s => RecordState::Valid(p),
            // Both readable but different: the primary is written first.
            (Some(point), Some(_)) | (Some(point), None) => RecordState::HalfCorrupt {
                point,
                damaged: Half::Shadow,
            },
            (None, Some(point)) => RecordState::HalfCorrupt {
                point,
                damaged: Half::Primary,
            },
            (None, None) => RecordState::FullyCorrupt,
        }
    }

    pub fn point(&self) -> Option<&CommitPoint> {
        match self {
            RecordState::Valid(point) | RecordState::HalfCorrupt { point, .. } => Some(point),
            RecordState::FullyCorrupt => None,
        }
    }
}

/// Encode both halves of a record.
pub(super) fn encode_record(point: &CommitPoint) -> [u8; RECORD_SIZE] {
    let half = RecordHalf::encode(point);
    let mut record = [0u8; RECORD_SIZE];
    record[..RecordHalf::SIZE].copy_from_slice(&half);
    record[RecordHalf::SIZE..].copy_from_slice(&half);
    record
}
