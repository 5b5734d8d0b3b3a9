//! Snapshot records
//!
//! A snapshot lives in a numbered directory: `<dir>/<num>/info.json` holds
//! the metadata, `<dir>/<num>/snapshot` is the backing subvolume, and an
//! optional zero-byte `<dir>/<num>/snapsync-partial` marker flags an
//! interrupted transfer.

use crate::driver::Driver;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Reserved user-data key marking a snapshot as a synchronization point; the
/// value is the target's UUID
pub const SYNC_POINT_KEY: &str = "snapsync";

/// Reserved user-data key protecting a snapshot from timeline pruning
pub const IMPORTANT_KEY: &str = "important";

/// Sentinel file marking a snapshot as partially synchronized
///
/// Created before any data is streamed, removed only after a verified
/// commit. Its presence is the sole authority for "this snapshot is
/// incomplete", overriding directory-existence checks.
pub const PARTIAL_MARKER: &str = "snapsync-partial";

/// Persisted snapshot metadata (`info.json`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SnapshotInfo {
    /// Sequence number, unique within one snapshot directory
    pub num: u64,
    /// Creation timestamp
    pub date: DateTime<Utc>,
    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Arbitrary tags; see [`SYNC_POINT_KEY`] and [`IMPORTANT_KEY`]
    #[serde(default)]
    pub user_data: BTreeMap<String, String>,
}

/// Immutable description of one point-in-time snapshot
#[derive(Debug, Clone)]
pub struct SnapshotRecord {
    snapshot_dir: PathBuf,
    info: SnapshotInfo,
    partial: bool,
}

impl SnapshotRecord {
    /// Load and validate the snapshot stored at `snapshot_dir`
    pub fn open(snapshot_dir: &Path) -> Result<Self> {
        if !snapshot_dir.is_dir() {
            return Err(Error::InvalidSnapshot(snapshot_dir.to_path_buf()));
        }
        let subvolume_dir = snapshot_dir.join("snapshot");
        if !subvolume_dir.is_dir() {
            return Err(Error::InvalidSnapshot(snapshot_dir.to_path_buf()));
        }

        let info_path = snapshot_dir.join("info.json");
        let raw = std::fs::read_to_string(&info_path)
            .map_err(|_| Error::InvalidSnapshot(snapshot_dir.to_path_buf()))?;
        let info: SnapshotInfo =
            serde_json::from_str(&raw).map_err(|e| Error::InvalidInfoFile {
                path: info_path,
                reason: e.to_string(),
            })?;

        let partial = snapshot_dir.join(PARTIAL_MARKER).exists();
        Ok(Self {
            snapshot_dir: snapshot_dir.to_path_buf(),
            info,
            partial,
        })
    }

    pub fn num(&self) -> u64 {
        self.info.num
    }

    pub fn date(&self) -> DateTime<Utc> {
        self.info.date
    }

    pub fn user_data(&self) -> &BTreeMap<String, String> {
        &self.info.user_data
    }

    pub fn info(&self) -> &SnapshotInfo {
        &self.info
    }

    /// The snapshot's directory
    pub fn snapshot_dir(&self) -> &Path {
        &self.snapshot_dir
    }

    /// The backing subvolume
    pub fn subvolume_dir(&self) -> PathBuf {
        self.snapshot_dir.join("snapshot")
    }

    /// Path to the metadata file
    pub fn info_path(&self) -> PathBuf {
        self.snapshot_dir.join("info.json")
    }

    /// Path to the partial-transfer marker
    pub fn partial_marker_path(&self) -> PathBuf {
        self.snapshot_dir.join(PARTIAL_MARKER)
    }

    /// Whether this snapshot has only been partially synchronized
    ///
    /// A partial snapshot is not a valid restore point and is excluded from
    /// normal enumeration, but remains visible to the repair path.
    pub fn is_partial(&self) -> bool {
        self.partial
    }

    /// Whether the directory name agrees with the metadata's sequence number
    ///
    /// A disagreement means the directory holds some other snapshot's data
    /// and must not be treated as a valid copy of either number.
    pub fn num_matches_directory(&self) -> bool {
        let dir_num = self
            .snapshot_dir
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.parse::<u64>().ok());
        dir_num == Some(self.info.num)
    }

    /// Whether this snapshot is a synchronization point for any target
    pub fn is_synchronization_point(&self) -> bool {
        self.info.user_data.contains_key(SYNC_POINT_KEY)
    }

    /// Whether this snapshot anchors incremental transfers to the given
    /// target
    pub fn synchronization_point_for(&self, target_uuid: &str) -> bool {
        self.info
            .user_data
            .get(SYNC_POINT_KEY)
            .map(|uuid| uuid == target_uuid)
            .unwrap_or(false)
    }

    /// Whether this snapshot must never be pruned by the timeline policy
    pub fn is_important(&self) -> bool {
        self.info
            .user_data
            .get(IMPORTANT_KEY)
            .map(|v| v == "yes")
            .unwrap_or(false)
    }

    /// Estimated size in bytes of sending the whole subvolume
    pub fn size(&self, driver: &dyn Driver) -> Result<u64> {
        self.size_diff_from_generation(driver, 0)
    }

    /// Estimated size in bytes of an incremental send against `parent`
    pub fn size_diff_from(&self, driver: &dyn Driver, parent: &SnapshotRecord) -> Result<u64> {
        let parent_generation = driver.generation_of(&parent.subvolume_dir())?;
        self.size_diff_from_generation(driver, parent_generation)
    }

    fn size_diff_from_generation(&self, driver: &dyn Driver, generation: u64) -> Result<u64> {
        let changes = driver.find_new(&self.subvolume_dir(), generation)?;
        Ok(changes.iter().map(|c| c.len).sum())
    }
}

/// Write a snapshot's metadata file
pub fn write_info(snapshot_dir: &Path, info: &SnapshotInfo) -> Result<()> {
    let raw = serde_json::to_string_pretty(info).map_err(|e| Error::InvalidInfoFile {
        path: snapshot_dir.join("info.json"),
        reason: e.to_string(),
    })?;
    std::fs::write(snapshot_dir.join("info.json"), raw)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn make_snapshot(dir: &Path, num: u64, user_data: &[(&str, &str)]) -> PathBuf {
        let snapshot_dir = dir.join(num.to_string());
        std::fs::create_dir_all(snapshot_dir.join("snapshot")).unwrap();
        let info = SnapshotInfo {
            num,
            date: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            description: None,
            user_data: user_data
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };
        write_info(&snapshot_dir, &info).unwrap();
        snapshot_dir
    }

    #[test]
    fn test_open_valid_snapshot() {
        let tmp = TempDir::new().unwrap();
        let dir = make_snapshot(tmp.path(), 7, &[]);

        let record = SnapshotRecord::open(&dir).unwrap();
        assert_eq!(record.num(), 7);
        assert!(!record.is_partial());
        assert!(!record.is_synchronization_point());
        assert_eq!(record.subvolume_dir(), dir.join("snapshot"));
    }

    #[test]
    fn test_open_missing_directory() {
        let tmp = TempDir::new().unwrap();
        let err = SnapshotRecord::open(&tmp.path().join("42")).unwrap_err();
        assert!(matches!(err, Error::InvalidSnapshot(_)));
    }

    #[test]
    fn test_open_missing_subvolume() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("3");
        std::fs::create_dir(&dir).unwrap();
        let err = SnapshotRecord::open(&dir).unwrap_err();
        assert!(matches!(err, Error::InvalidSnapshot(_)));
    }

    #[test]
    fn test_unknown_info_field_rejected() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("5");
        std::fs::create_dir_all(dir.join("snapshot")).unwrap();
        std::fs::write(
            dir.join("info.json"),
            r#"{"num": 5, "date": "2024-06-01T12:00:00Z", "surprise": 1}"#,
        )
        .unwrap();

        let err = SnapshotRecord::open(&dir).unwrap_err();
        assert!(matches!(err, Error::InvalidInfoFile { .. }));
    }

    #[test]
    fn test_partial_marker_detected() {
        let tmp = TempDir::new().unwrap();
        let dir = make_snapshot(tmp.path(), 9, &[]);
        std::fs::File::create(dir.join(PARTIAL_MARKER)).unwrap();

        let record = SnapshotRecord::open(&dir).unwrap();
        assert!(record.is_partial());
    }

    #[test]
    fn test_synchronization_point_tags() {
        let tmp = TempDir::new().unwrap();
        let uuid = "ab520b69-5ac6-425f-a3a1-0e2765bd7ba0";
        let dir = make_snapshot(tmp.path(), 2, &[(SYNC_POINT_KEY, uuid), (IMPORTANT_KEY, "yes")]);

        let record = SnapshotRecord::open(&dir).unwrap();
        assert!(record.is_synchronization_point());
        assert!(record.synchronization_point_for(uuid));
        assert!(!record.synchronization_point_for("some-other-target"));
        assert!(record.is_important());
    }

    #[test]
    fn test_info_roundtrip() {
        let info = SnapshotInfo {
            num: 11,
            date: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
            description: Some("synchronization snapshot for snapsync".into()),
            user_data: [(IMPORTANT_KEY.to_string(), "yes".to_string())]
                .into_iter()
                .collect(),
        };
        let raw = serde_json::to_string(&info).unwrap();
        let parsed: SnapshotInfo = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.num, info.num);
        assert_eq!(parsed.date, info.date);
        assert_eq!(parsed.description, info.description);
        assert_eq!(parsed.user_data, info.user_data);
    }
}
