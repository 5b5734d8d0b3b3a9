//! Directory-backed snapshot stores
//!
//! A snapshot directory contains one numbered subdirectory per snapshot.
//! Enumeration is restartable and finite; invalid or partial entries are
//! skipped with a warning, except through the raw enumeration used by the
//! repair path.

use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::snapshot::{self, SnapshotInfo, SnapshotRecord};
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// One entry of the raw enumeration, including the broken ones
#[derive(Debug)]
pub enum RawSnapshot {
    Valid(SnapshotRecord),
    Invalid { path: PathBuf, error: Error },
}

impl RawSnapshot {
    /// The snapshot directory this entry refers to
    pub fn path(&self) -> &Path {
        match self {
            RawSnapshot::Valid(s) => s.snapshot_dir(),
            RawSnapshot::Invalid { path, .. } => path,
        }
    }
}

/// A directory of numbered snapshots
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the directory that would hold snapshot `num`
    pub fn snapshot_dir(&self, num: u64) -> PathBuf {
        self.dir.join(num.to_string())
    }

    /// Every numbered entry, valid or not, sorted by number
    ///
    /// This is the repair path's view: partial and invalid snapshots are
    /// included.
    pub fn each_snapshot_raw(&self) -> Result<Vec<RawSnapshot>> {
        let mut entries: BTreeMap<u64, RawSnapshot> = BTreeMap::new();
        for dir_entry in std::fs::read_dir(&self.dir)? {
            let path = dir_entry?.path();
            if !path.is_dir() {
                continue;
            }
            let Some(num) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.parse::<u64>().ok())
            else {
                continue;
            };
            let raw = match SnapshotRecord::open(&path) {
                Ok(snapshot) => RawSnapshot::Valid(snapshot),
                Err(error) => RawSnapshot::Invalid { path, error },
            };
            entries.insert(num, raw);
        }
        Ok(entries.into_values().collect())
    }

    /// The valid, complete snapshots, sorted by number
    ///
    /// Partial snapshots, entries that fail validation and entries whose
    /// metadata disagrees with their directory name are warned about and
    /// skipped.
    pub fn each_snapshot(&self) -> Result<Vec<SnapshotRecord>> {
        let mut snapshots = Vec::new();
        for raw in self.each_snapshot_raw()? {
            match raw {
                RawSnapshot::Valid(snapshot) => {
                    if !snapshot.num_matches_directory() {
                        tracing::warn!(
                            "ignored {}: the snapshot reports num={} but its directory disagrees",
                            snapshot.snapshot_dir().display(),
                            snapshot.num()
                        );
                    } else if snapshot.is_partial() {
                        tracing::warn!(
                            "ignored {}: this is a partial snapshot",
                            snapshot.snapshot_dir().display()
                        );
                    } else {
                        snapshots.push(snapshot);
                    }
                }
                RawSnapshot::Invalid { path, error } => {
                    tracing::warn!("ignored {}: {}", path.display(), error);
                }
            }
        }
        snapshots.sort_by_key(|s| s.num());
        Ok(snapshots)
    }
}

/// A source filesystem: a live subvolume plus its snapshot directory
#[derive(Debug, Clone)]
pub struct Source {
    subvolume: PathBuf,
    store: SnapshotStore,
}

impl Source {
    pub fn new(subvolume: impl Into<PathBuf>, snapshot_dir: impl Into<PathBuf>) -> Self {
        Self {
            subvolume: subvolume.into(),
            store: SnapshotStore::new(snapshot_dir),
        }
    }

    pub fn subvolume(&self) -> &Path {
        &self.subvolume
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn each_snapshot(&self) -> Result<Vec<SnapshotRecord>> {
        self.store.each_snapshot()
    }

    /// Create a new snapshot of the live subvolume
    ///
    /// Mints the next sequence number, writes the metadata and snapshots the
    /// subvolume read-only into place.
    pub fn create(
        &self,
        driver: &dyn Driver,
        description: &str,
        user_data: BTreeMap<String, String>,
    ) -> Result<SnapshotRecord> {
        let num = self
            .store
            .each_snapshot_raw()?
            .iter()
            .filter_map(|raw| match raw {
                RawSnapshot::Valid(s) => Some(s.num()),
                RawSnapshot::Invalid { path, .. } => path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .and_then(|n| n.parse::<u64>().ok()),
            })
            .max()
            .unwrap_or(0)
            + 1;

        let snapshot_dir = self.store.snapshot_dir(num);
        std::fs::create_dir(&snapshot_dir)?;
        let info = SnapshotInfo {
            num,
            date: Utc::now(),
            description: Some(description.to_string()),
            user_data,
        };
        snapshot::write_info(&snapshot_dir, &info)?;
        driver.snapshot(&self.subvolume, &snapshot_dir.join("snapshot"))?;

        tracing::info!("created snapshot {} at {}", num, snapshot_dir.display());
        SnapshotRecord::open(&snapshot_dir)
    }

    /// Delete one of this source's snapshots: subvolume first, then the
    /// metadata directory
    pub fn delete(&self, driver: &dyn Driver, snapshot: &SnapshotRecord) -> Result<()> {
        tracing::info!(
            "removing source snapshot {} at {}",
            snapshot.num(),
            snapshot.snapshot_dir().display()
        );
        driver.delete_subvolume(&snapshot.subvolume_dir())?;
        std::fs::remove_dir_all(snapshot.snapshot_dir())?;
        Ok(())
    }
}
