//! Master file - store identity and the commit point log.
//!
//! The master file is the single authority on which commit is current.
//!
//! # Layout
//! ```text
//! ┌──────────────┬──────────────────┬──────────────────┬─────┐
//! │ MasterHeader │ Record 0         │ Record 1         │ ... │
//! │ (64 bytes)   │ primary | shadow │ primary | shadow │     │
//! └──────────────┴──────────────────┴──────────────────┴─────┘
//! ```
//!
//! Records are fixed-width, so the log can be walked from either end.
//!
//! # Recovery
//! On open every record is classified as valid, half-corrupt or fully
//! corrupt. The latest commit point is the last record that is not fully
//! corrupt. A writable open then heals that record's damaged half and cuts
//! off anything after it, so a second open finds a clean log and appends
//! land right after the recovered commit.

mod header;
mod record;

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::common::config::StoreConfig;
use crate::common::{Error, Result};
use crate::storage::persistence::{PersistenceManager, StorageFile};

pub use header::MasterHeader;
pub use record::CommitPoint;

use record::{encode_record, RecordState, RECORD_SIZE};

/// What a writable open had to repair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Records whose damaged half was rewritten from the surviving half.
    pub healed: usize,
    /// Fully corrupt records cut from the end of the log.
    pub discarded: usize,
    /// Bytes cut from the end of the file.
    pub truncated_bytes: u64,
    /// Fully corrupt records followed by a readable one. They stay in the
    /// file and are skipped on every open, so they are not a repair.
    pub skipped: usize,
}

impl RecoveryReport {
    /// Whether the open had nothing to repair. Skipped records do not count.
    pub fn is_clean(&self) -> bool {
        self.healed == 0 && self.discarded == 0 && self.truncated_bytes == 0
    }
}

struct LogFile {
    file: Box<dyn StorageFile>,
    /// Offset where the next record goes.
    end: u64,
}

/// Append-only commit point log with a self-healing tail.
///
/// # Thread Safety
/// - `log`: `Mutex`, held by the single appender
/// - `points`: `RwLock`, readers list commit points without touching the
///   file, so they never observe a half-written record
pub struct MasterFile {
    path: PathBuf,
    header: MasterHeader,
    log: Mutex<LogFile>,
    /// Readable commit points, oldest first.
    points: RwLock<Vec<CommitPoint>>,
    recovery: RecoveryReport,
    read_only: bool,
}

impl MasterFile {
    /// Create a new master file with a fresh store id.
    ///
    /// # Errors
    /// Fails if the file already exists or the config is invalid.
    pub fn create(
        pm: &dyn PersistenceManager,
        path: impl AsRef<Path>,
        config: &StoreConfig,
        store_set_id: Uuid,
    ) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref();
        let header = MasterHeader::new(config, store_set_id);

        let mut file = pm.create_file(path)?;
        file.write_all(&header.to_bytes())?;
        file.sync()?;

        tracing::info!(path = %path.display(), store_id = %header.store_id, "created master file");
        Ok(Self {
            path: path.to_path_buf(),
            header,
            log: Mutex::new(LogFile {
                file,
                end: MasterHeader::SIZE as u64,
            }),
            points: RwLock::new(Vec::new()),
            recovery: RecoveryReport::default(),
            read_only: false,
        })
    }

    /// Open for appending, repairing a damaged tail.
    pub fn open(pm: &dyn PersistenceManager, path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(pm, path.as_ref(), false)
    }

    /// Open without modifying the file. Damage is tolerated the same way
    /// but left in place.
    pub fn open_read_only(pm: &dyn PersistenceManager, path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(pm, path.as_ref(), true)
    }

    fn open_with(pm: &dyn PersistenceManager, path: &Path, read_only: bool) -> Result<Self> {
        let mut file = pm.open_file(path, !read_only)?;
        let size = file.size()?;
        if size < MasterHeader::SIZE as u64 {
            return Err(Error::corruption(format!(
                "master file {} is too short for a header",
                path.display()
            )));
        }

        file.seek(SeekFrom::Start(0))?;
        let mut header_bytes = [0u8; MasterHeader::SIZE];
        file.read_exact(&mut header_bytes)?;
        let header = MasterHeader::from_bytes(&header_bytes)?;

        let mut body = Vec::with_capacity((size - MasterHeader::SIZE as u64) as usize);
        file.read_to_end(&mut body)?;
        let states: Vec<RecordState> = body.chunks(RECORD_SIZE).map(RecordState::classify).collect();

        let (points, recovery, end) = if read_only {
            plan_recovery(&states, body.len())
        } else {
            recover(file.as_mut(), &states, body.len())?
        };

        tracing::info!(
            path = %path.display(),
            store_id = %header.store_id,
            commits = points.len(),
            read_only,
            "opened master file"
        );
        Ok(Self {
            path: path.to_path_buf(),
            header,
            log: Mutex::new(LogFile { file, end }),
            points: RwLock::new(points),
            recovery,
            read_only,
        })
    }

    /// Append a commit point and sync. On success it becomes the latest.
    ///
    /// # Errors
    /// - `Error::InvalidOperation` on a read-only handle or if the commit
    ///   number does not advance past the latest
    /// - I/O errors; the log is left as it was and the next append
    ///   overwrites any partial bytes
    pub fn append_commit_point(&self, point: CommitPoint) -> Result<()> {
        if self.read_only {
            return Err(Error::invalid_op("master file opened read-only"));
        }

        let mut log = self.log.lock();
        if let Some(latest) = self.get_latest_commit_point() {
            if point.commit_number <= latest.commit_number {
                return Err(Error::invalid_op(format!(
                    "commit {} does not follow commit {}",
                    point.commit_number, latest.commit_number
                )));
            }
        }

        let end = log.end;
        log.file.seek(SeekFrom::Start(end))?;
        log.file.write_all(&encode_record(&point))?;
        log.file.sync()?;
        log.end = end + RECORD_SIZE as u64;

        self.points.write().push(point);
        tracing::debug!(commit = point.commit_number, offset = point.location_offset, "appended commit point");
        Ok(())
    }

    /// All readable commit points, most recent first.
    pub fn get_commit_points(&self) -> Vec<CommitPoint> {
        self.points.read().iter().rev().copied().collect()
    }

    /// The current commit, if any commit happened.
    pub fn get_latest_commit_point(&self) -> Option<CommitPoint> {
        self.points.read().last().copied()
    }

    /// Find a commit point by number.
    pub fn get_commit_point(&self, commit_number: u64) -> Option<CommitPoint> {
        self.points
            .read()
            .iter()
            .find(|p| p.commit_number == commit_number)
            .copied()
    }

    pub fn header(&self) -> &MasterHeader {
        &self.header
    }

    pub fn store_id(&self) -> Uuid {
        self.header.store_id
    }

    /// Repairs made (or, read-only, found) when the file was opened.
    pub fn recovery(&self) -> RecoveryReport {
        self.recovery
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }
}

/// Fold the classified records into the readable commit points.
///
/// Returns the points, a report of the damage, and the offset where the
/// next record belongs (right after the latest readable record).
fn plan_recovery(states: &[RecordState], body_len: usize) -> (Vec<CommitPoint>, RecoveryReport, u64) {
    let latest = states.iter().rposition(|s| s.point().is_some());
    let kept = latest.map_or(0, |i| i + 1);

    let mut report = RecoveryReport::default();
    let mut points = Vec::with_capacity(kept);
    for (index, state) in states[..kept].iter().enumerate() {
        match state {
            RecordState::Valid(point) => points.push(*point),
            RecordState::HalfCorrupt { point, damaged } => {
                tracing::warn!(record = index, commit = point.commit_number, ?damaged, "commit record has a damaged half");
                report.healed += 1;
                points.push(*point);
            }
            RecordState::FullyCorrupt => {
                tracing::warn!(record = index, "skipping unreadable commit record");
                report.skipped += 1;
            }
        }
    }

    let discarded_tail = states.len() - kept;
    if discarded_tail > 0 {
        tracing::warn!(records = discarded_tail, "discarding unreadable commit records at end of log");
    }
    report.discarded += discarded_tail;

    let end = (MasterHeader::SIZE + kept * RECORD_SIZE) as u64;
    report.truncated_bytes = (MasterHeader::SIZE + body_len) as u64 - end;
    (points, report, end)
}

/// Apply the plan: rewrite damaged halves and truncate the tail.
fn recover(
    file: &mut dyn StorageFile,
    states: &[RecordState],
    body_len: usize,
) -> Result<(Vec<CommitPoint>, RecoveryReport, u64)> {
    let (points, report, end) = plan_recovery(states, body_len);

    for (index, state) in states.iter().enumerate() {
        if let RecordState::HalfCorrupt { point, damaged } = state {
            let record = encode_record(point);
            let at = MasterHeader::SIZE + index * RECORD_SIZE + damaged.offset();
            file.seek(SeekFrom::Start(at as u64))?;
            file.write_all(&record[damaged.offset()..damaged.offset() + RECORD_SIZE / 2])?;
            tracing::info!(record = index, commit = point.commit_number, "healed commit record");
        }
    }
    if report.truncated_bytes > 0 {
        file.set_size(end)?;
        tracing::info!(bytes = report.truncated_bytes, "truncated master file");
    }
    if !report.is_clean() {
        file.sync()?;
    }
    Ok((points, report, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::persistence::FilePersistenceManager;
    use chrono::Utc;
    use record::RecordHalf;
    use tempfile::tempdir;

    fn create(path: &Path) -> MasterFile {
        MasterFile::create(
            &FilePersistenceManager::new(),
            path,
            &StoreConfig::default(),
            Uuid::new_v4(),
        )
        .unwrap()
    }

    fn flip_byte(path: &Path, offset: usize) {
        let mut bytes = std::fs::read(path).unwrap();
        bytes[offset] ^= 0xFF;
        std::fs::write(path, bytes).unwrap();
    }

    fn record_offset(index: usize) -> usize {
        MasterHeader::SIZE + index * RECORD_SIZE
    }

    #[test]
    fn test_open_without_commits() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("master.sdb");
        let store_id = create(&path).store_id();

        let master = MasterFile::open(&FilePersistenceManager::new(), &path).unwrap();
        assert_eq!(master.store_id(), store_id);
        assert!(master.get_latest_commit_point().is_none());
        assert!(master.get_commit_points().is_empty());
        assert!(master.recovery().is_clean());
    }

    #[test]
    fn test_append_and_list_newest_first() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("master.sdb");
        let master = create(&path);
        for n in 1..=3 {
            master.append_commit_point(CommitPoint::new(n, n * 100, Uuid::new_v4())).unwrap();
        }

        let numbers: Vec<u64> = master.get_commit_points().iter().map(|p| p.commit_number).collect();
        assert_eq!(numbers, vec![3, 2, 1]);
        assert_eq!(master.get_commit_point(2).unwrap().location_offset, 200);
    }

    #[test]
    fn test_commit_points_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("master.sdb");
        let master = create(&path);
        let start = Utc::now();
        let appended: Vec<CommitPoint> = (1..=5)
            .map(|n| {
                let at = start + chrono::Duration::microseconds(n as i64 * 1_234_567);
                CommitPoint::at(n, n * 4096 + 7, at, Uuid::new_v4())
            })
            .collect();
        for point in &appended {
            master.append_commit_point(*point).unwrap();
        }
        drop(master);

        let master = MasterFile::open(&FilePersistenceManager::new(), &path).unwrap();
        let mut expected = appended.clone();
        expected.reverse();
        assert_eq!(master.get_commit_points(), expected);
        assert!(master.recovery().is_clean());

        let third = master.get_commit_point(3).unwrap();
        assert_eq!(third, appended[2]);
        assert_eq!(third.timestamp.timestamp_subsec_nanos() % 1_000_000, 0);
        assert_eq!(third.timestamp.timestamp_millis(), appended[2].timestamp.timestamp_millis());
        assert_eq!(third.job_id, appended[2].job_id);
    }

    #[test]
    fn test_corrupt_middle_record_is_skipped_not_repaired() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("master.sdb");
        let master = create(&path);
        for n in 1..=3 {
            master.append_commit_point(CommitPoint::new(n, n, Uuid::new_v4())).unwrap();
        }
        drop(master);

        flip_byte(&path, record_offset(1) + 3);
        flip_byte(&path, record_offset(1) + RecordHalf::SIZE + 3);

        let pm = FilePersistenceManager::new();
        for _ in 0..2 {
            let master = MasterFile::open(&pm, &path).unwrap();
            let numbers: Vec<u64> = master.get_commit_points().iter().map(|p| p.commit_number).collect();
            assert_eq!(numbers, vec![3, 1]);
            assert_eq!(master.recovery().skipped, 1);
            assert_eq!(master.recovery().discarded, 0);
            assert!(master.recovery().is_clean());
        }
    }

    #[test]
    fn test_commit_number_must_advance() {
        let dir = tempdir().unwrap();
        let master = create(&dir.path().join("master.sdb"));
        master.append_commit_point(CommitPoint::new(2, 0, Uuid::nil())).unwrap();
        assert!(matches!(
            master.append_commit_point(CommitPoint::new(2, 0, Uuid::nil())),
            Err(Error::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_heals_damaged_half() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("master.sdb");
        let master = create(&path);
        master.append_commit_point(CommitPoint::new(1, 10, Uuid::new_v4())).unwrap();
        let latest = CommitPoint::new(2, 20, Uuid::new_v4());
        master.append_commit_point(latest).unwrap();
        drop(master);

        flip_byte(&path, record_offset(1) + RecordHalf::SIZE + 17);

        let pm = FilePersistenceManager::new();
        let master = MasterFile::open(&pm, &path).unwrap();
        assert_eq!(master.get_latest_commit_point(), Some(latest));
        assert_eq!(master.recovery().healed, 1);
        drop(master);

        let master = MasterFile::open(&pm, &path).unwrap();
        assert!(master.recovery().is_clean());
        assert_eq!(master.get_commit_points().len(), 2);
    }

    #[test]
    fn test_drops_fully_corrupt_tail_and_appends_after() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("master.sdb");
        let master = create(&path);
        for n in 1..=3 {
            master.append_commit_point(CommitPoint::new(n, n, Uuid::new_v4())).unwrap();
        }
        drop(master);

        flip_byte(&path, record_offset(2) + 3);
        flip_byte(&path, record_offset(2) + RecordHalf::SIZE + 3);

        let pm = FilePersistenceManager::new();
        let master = MasterFile::open(&pm, &path).unwrap();
        assert_eq!(master.get_latest_commit_point().unwrap().commit_number, 2);
        assert_eq!(master.get_commit_points().len(), 2);
        assert_eq!(master.recovery().discarded, 1);
        assert_eq!(master.recovery().truncated_bytes, RECORD_SIZE as u64);

        master.append_commit_point(CommitPoint::new(3, 33, Uuid::new_v4())).unwrap();
        drop(master);

        let master = MasterFile::open(&pm, &path).unwrap();
        assert!(master.recovery().is_clean());
        assert_eq!(master.get_latest_commit_point().unwrap().location_offset, 33);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), record_offset(3) as u64);
    }

    #[test]
    fn test_partial_trailing_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("master.sdb");
        let master = create(&path);
        master.append_commit_point(CommitPoint::new(1, 1, Uuid::new_v4())).unwrap();
        drop(master);

        let mut bytes = std::fs::read(&path).unwrap();
        bytes.extend_from_slice(&[0xAB; 40]);
        std::fs::write(&path, bytes).unwrap();

        let master = MasterFile::open(&FilePersistenceManager::new(), &path).unwrap();
        assert_eq!(master.get_commit_points().len(), 1);
        assert_eq!(master.recovery().truncated_bytes, 40);
    }

    #[test]
    fn test_read_only_open_leaves_file_alone() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("master.sdb");
        let master = create(&path);
        master.append_commit_point(CommitPoint::new(1, 1, Uuid::new_v4())).unwrap();
        master.append_commit_point(CommitPoint::new(2, 2, Uuid::new_v4())).unwrap();
        drop(master);
        flip_byte(&path, record_offset(1) + 5);
        flip_byte(&path, record_offset(1) + RecordHalf::SIZE + 5);
        let before = std::fs::read(&path).unwrap();

        let master = MasterFile::open_read_only(&FilePersistenceManager::new(), &path).unwrap();
        assert_eq!(master.get_latest_commit_point().unwrap().commit_number, 1);
        assert!(master.append_commit_point(CommitPoint::new(3, 3, Uuid::nil())).is_err());
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }
}
