//! Shared helpers for the unit tests in this crate

use chrono::{DateTime, Utc};
use snapsync_core::driver::{
    ChangeRecord, Driver, DriverError, ReceiveSink, SendStream, SubvolumeInfo,
};
use snapsync_core::{SnapshotInfo, SnapshotRecord};
use std::path::Path;

/// Write a snapshot directory and return its record
pub fn make_record(
    dir: &Path,
    num: u64,
    date: DateTime<Utc>,
    user_data: &[(&str, &str)],
) -> SnapshotRecord {
    let snapshot_dir = dir.join(num.to_string());
    std::fs::create_dir_all(snapshot_dir.join("snapshot")).unwrap();
    let info = SnapshotInfo {
        num,
        date,
        description: None,
        user_data: user_data
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    };
    std::fs::write(
        snapshot_dir.join("info.json"),
        serde_json::to_string(&info).unwrap(),
    )
    .unwrap();
    SnapshotRecord::open(&snapshot_dir).unwrap()
}

/// A driver stub for tests that never reach the filesystem tool
pub struct NoopDriver;

impl Driver for NoopDriver {
    fn list_subvolumes(&self, _mountpoint: &Path) -> Result<Vec<SubvolumeInfo>, DriverError> {
        Ok(Vec::new())
    }

    fn generation_of(&self, _subvolume: &Path) -> Result<u64, DriverError> {
        Ok(1)
    }

    fn find_new(
        &self,
        _subvolume: &Path,
        _since_generation: u64,
    ) -> Result<Vec<ChangeRecord>, DriverError> {
        Ok(Vec::new())
    }

    fn send(
        &self,
        subvolume: &Path,
        _parent: Option<&Path>,
    ) -> Result<Box<dyn SendStream>, DriverError> {
        Err(DriverError::new("send", format!("not available for {}", subvolume.display())))
    }

    fn receive(&self, target_dir: &Path) -> Result<Box<dyn ReceiveSink>, DriverError> {
        Err(DriverError::new("receive", format!("not available for {}", target_dir.display())))
    }

    fn snapshot(&self, _source: &Path, dest: &Path) -> Result<(), DriverError> {
        std::fs::create_dir_all(dest).map_err(|e| DriverError::new("snapshot", e.to_string()))
    }

    fn delete_subvolume(&self, subvolume: &Path) -> Result<(), DriverError> {
        std::fs::remove_dir_all(subvolume)
            .map_err(|e| DriverError::new("subvolume delete", e.to_string()))
    }

    fn sync_filesystem(&self, _path: &Path) -> Result<(), DriverError> {
        Ok(())
    }

    fn wait_deletions(&self, _path: &Path) -> Result<(), DriverError> {
        Ok(())
    }
}
