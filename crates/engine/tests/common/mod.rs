//! Shared fixtures for the engine integration tests
//!
//! `MockDriver` stands in for the btrfs tool: subvolumes are plain
//! directories holding a `payload` file, send produces the payload bytes,
//! receive materializes them on `finish`. Every operation is recorded so
//! tests can assert on the exact transfer sequence.

use chrono::{DateTime, TimeZone, Utc};
use snapsync_core::driver::{
    ChangeRecord, Driver, DriverError, ReceiveSink, SendStream, SubvolumeInfo,
};
use snapsync_core::snapshot::write_info;
use snapsync_core::{SnapshotInfo, SnapshotRecord, Source};
use snapsync_engine::Target;
use std::collections::BTreeSet;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// One recorded driver operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Send { num: u64, parent: Option<u64> },
    ReceiveFinish,
    Snapshot { dest: PathBuf },
    DeleteSubvolume(PathBuf),
    SyncFilesystem,
    WaitDeletions,
}

/// Snapshot number of a `<dir>/<num>/snapshot` subvolume path
fn snapshot_num(subvolume: &Path) -> Option<u64> {
    subvolume
        .parent()?
        .file_name()?
        .to_str()?
        .parse::<u64>()
        .ok()
}

pub struct MockDriver {
    ops: Arc<Mutex<Vec<Op>>>,
    fail_sends: Mutex<BTreeSet<u64>>,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            ops: Arc::new(Mutex::new(Vec::new())),
            fail_sends: Mutex::new(BTreeSet::new()),
        }
    }

    /// Make every send of the given snapshot fail mid-stream
    pub fn fail_send_of(&self, num: u64) {
        self.fail_sends.lock().unwrap().insert(num);
    }

    pub fn clear_failures(&self) {
        self.fail_sends.lock().unwrap().clear();
    }

    pub fn ops(&self) -> Vec<Op> {
        self.ops.lock().unwrap().clone()
    }

    /// The `(num, parent_num)` pairs of every send, in order
    pub fn sends(&self) -> Vec<(u64, Option<u64>)> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::Send { num, parent } => Some((num, parent)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, op: Op) {
        self.ops.lock().unwrap().push(op);
    }
}

struct MockSendStream {
    data: Cursor<Vec<u8>>,
    fail: bool,
}

impl Read for MockSendStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let read = self.data.read(buf)?;
        if read == 0 && self.fail {
            return Err(std::io::Error::other("mock send stream failed"));
        }
        Ok(read)
    }
}

impl SendStream for MockSendStream {
    fn finish(self: Box<Self>) -> Result<(), DriverError> {
        if self.fail {
            Err(DriverError::new("btrfs send", "non-zero exit"))
        } else {
            Ok(())
        }
    }
}

struct MockReceiveSink {
    subvolume: PathBuf,
    buffer: Vec<u8>,
    ops: Arc<Mutex<Vec<Op>>>,
}

impl Write for MockReceiveSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl ReceiveSink for MockReceiveSink {
    fn finish(self: Box<Self>) -> Result<(), DriverError> {
        self.ops.lock().unwrap().push(Op::ReceiveFinish);
        std::fs::write(self.subvolume.join("payload"), &self.buffer)
            .map_err(|e| DriverError::new("btrfs receive", e.to_string()))
    }
}

impl Driver for MockDriver {
    fn list_subvolumes(&self, _mountpoint: &Path) -> Result<Vec<SubvolumeInfo>, DriverError> {
        Ok(Vec::new())
    }

    fn generation_of(&self, _subvolume: &Path) -> Result<u64, DriverError> {
        Ok(1)
    }

    fn find_new(
        &self,
        subvolume: &Path,
        _since_generation: u64,
    ) -> Result<Vec<ChangeRecord>, DriverError> {
        let len = std::fs::metadata(subvolume.join("payload"))
            .map(|m| m.len())
            .unwrap_or(0);
        Ok(vec![ChangeRecord { len }])
    }

    fn send(
        &self,
        subvolume: &Path,
        parent: Option<&Path>,
    ) -> Result<Box<dyn SendStream>, DriverError> {
        let num = snapshot_num(subvolume)
            .ok_or_else(|| DriverError::new("btrfs send", "unexpected subvolume path"))?;
        self.record(Op::Send {
            num,
            parent: parent.and_then(snapshot_num),
        });
        let data = std::fs::read(subvolume.join("payload"))
            .map_err(|e| DriverError::new("btrfs send", e.to_string()))?;
        let fail = self.fail_sends.lock().unwrap().contains(&num);
        Ok(Box::new(MockSendStream {
            data: Cursor::new(data),
            fail,
        }))
    }

    fn receive(&self, target_dir: &Path) -> Result<Box<dyn ReceiveSink>, DriverError> {
        let subvolume = target_dir.join("snapshot");
        std::fs::create_dir_all(&subvolume)
            .map_err(|e| DriverError::new("btrfs receive", e.to_string()))?;
        Ok(Box::new(MockReceiveSink {
            subvolume,
            buffer: Vec::new(),
            ops: Arc::clone(&self.ops),
        }))
    }

    fn snapshot(&self, source: &Path, dest: &Path) -> Result<(), DriverError> {
        self.record(Op::Snapshot {
            dest: dest.to_path_buf(),
        });
        std::fs::create_dir_all(dest)
            .map_err(|e| DriverError::new("snapshot", e.to_string()))?;
        let payload = source.join("payload");
        if payload.is_file() {
            std::fs::copy(&payload, dest.join("payload"))
                .map_err(|e| DriverError::new("snapshot", e.to_string()))?;
        }
        Ok(())
    }

    fn delete_subvolume(&self, subvolume: &Path) -> Result<(), DriverError> {
        self.record(Op::DeleteSubvolume(subvolume.to_path_buf()));
        std::fs::remove_dir_all(subvolume)
            .map_err(|e| DriverError::new("subvolume delete", e.to_string()))
    }

    fn sync_filesystem(&self, _path: &Path) -> Result<(), DriverError> {
        self.record(Op::SyncFilesystem);
        Ok(())
    }

    fn wait_deletions(&self, _path: &Path) -> Result<(), DriverError> {
        self.record(Op::WaitDeletions);
        Ok(())
    }
}

/// A source/target pair on a temporary directory
pub struct Fixture {
    pub tmp: TempDir,
    pub driver: Arc<MockDriver>,
    pub source: Source,
    pub target_dir: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let subvolume = tmp.path().join("subvolume");
        let snapshots = tmp.path().join("snapshots");
        let target_dir = tmp.path().join("backup");
        std::fs::create_dir_all(&subvolume).unwrap();
        std::fs::create_dir_all(&snapshots).unwrap();
        std::fs::create_dir_all(&target_dir).unwrap();
        std::fs::write(subvolume.join("payload"), b"live subvolume state").unwrap();

        let source = Source::new(&subvolume, &snapshots);
        Self {
            tmp,
            driver: Arc::new(MockDriver::new()),
            source,
            target_dir,
        }
    }

    pub fn date(&self, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, day, 12, 0, 0).unwrap()
    }

    /// Seed one source snapshot with a distinctive payload
    pub fn add_source_snapshot(
        &self,
        num: u64,
        day: u32,
        user_data: &[(&str, &str)],
    ) -> SnapshotRecord {
        let dir = self.source.store().snapshot_dir(num);
        std::fs::create_dir_all(dir.join("snapshot")).unwrap();
        std::fs::write(
            dir.join("snapshot").join("payload"),
            format!("snapshot {num} payload"),
        )
        .unwrap();
        let info = SnapshotInfo {
            num,
            date: self.date(day),
            description: None,
            user_data: user_data
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };
        write_info(&dir, &info).unwrap();
        SnapshotRecord::open(&dir).unwrap()
    }

    pub fn open_target(&self) -> Target {
        Target::open(
            &self.target_dir,
            Arc::clone(&self.driver) as Arc<dyn Driver>,
            true,
        )
        .unwrap()
    }

    /// Snapshot numbers currently on the target, sorted
    pub fn target_nums(&self, target: &Target) -> Vec<u64> {
        target
            .each_snapshot()
            .unwrap()
            .iter()
            .map(|s| s.num())
            .collect()
    }

    /// Snapshot numbers currently on the source, sorted
    pub fn source_nums(&self) -> Vec<u64> {
        self.source
            .each_snapshot()
            .unwrap()
            .iter()
            .map(|s| s.num())
            .collect()
    }
}
