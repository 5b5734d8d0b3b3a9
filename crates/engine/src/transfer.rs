//! The snapshot transfer state machine
//!
//! Drives one `sync()` run: pick the synchronization snapshot, work out
//! which source snapshots the target's policy requires, and stream them in
//! ascending order, each as a delta against the last snapshot known to exist
//! on both sides. Partial markers make an interrupted run recoverable; any
//! transfer failure aborts the whole run so the incremental chain stays
//! intact.

use crate::target::Target;
use snapsync_core::snapshot::write_info;
use snapsync_core::util::{human_readable_size, human_readable_time};
use snapsync_core::{
    Driver, Error, Result, SnapshotRecord, Source, IMPORTANT_KEY, SYNC_POINT_KEY,
};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};
use std::time::{Duration, Instant};

const COPY_CHUNK: usize = 1024 * 1024;

pub struct TransferEngine<'a> {
    source: &'a Source,
    target: &'a Target,
}

impl<'a> TransferEngine<'a> {
    pub fn new(source: &'a Source, target: &'a Target) -> Self {
        Self { source, target }
    }

    fn driver(&self) -> &dyn Driver {
        self.target.driver()
    }

    /// Bring the target up to date with the source
    ///
    /// Transfers are strictly sequential in ascending num order; the first
    /// failure propagates and aborts the run.
    pub fn sync(&self) -> Result<()> {
        let sync_snapshot = self.find_or_create_sync_snapshot()?;
        let source_snapshots = self.source.each_snapshot()?;
        let target_snapshots = self.target.each_snapshot()?;
        let target_nums: BTreeSet<u64> = target_snapshots.iter().map(|s| s.num()).collect();

        let mut cursor = last_common(&source_snapshots, &target_nums).cloned();
        if cursor.is_none() {
            tracing::warn!(
                "no common snapshot between {} and {}, the first transfer will not be incremental",
                self.source.store().dir().display(),
                self.target.description()
            );
        }

        let required = self.required_nums(&source_snapshots, &target_snapshots)?;
        for snapshot in &source_snapshots {
            if snapshot.num() == sync_snapshot.num() {
                continue;
            }
            let on_target = target_nums.contains(&snapshot.num());
            if !required.contains(&snapshot.num()) {
                // Skipped by policy, but a copy already on the target is
                // still a valid delta parent
                if on_target {
                    cursor = Some(snapshot.clone());
                }
                continue;
            }
            if !on_target {
                self.synchronize_snapshot(snapshot, cursor.as_ref())?;
            }
            cursor = Some(snapshot.clone());
        }

        self.synchronize_snapshot(&sync_snapshot, cursor.as_ref())?;
        self.remove_synchronization_points(&sync_snapshot)?;
        Ok(())
    }

    /// The snapshot anchoring this run's incremental chain
    ///
    /// Reuses the newest snapshot of the trailing run of synchronization
    /// points when one belongs to this target, otherwise creates a fresh
    /// tagged snapshot on the source.
    fn find_or_create_sync_snapshot(&self) -> Result<SnapshotRecord> {
        let snapshots = self.source.each_snapshot()?;
        if let Some(existing) = trailing_sync_snapshot(self.target.uuid(), &snapshots) {
            tracing::debug!("reusing synchronization snapshot {}", existing.num());
            return Ok(existing.clone());
        }

        let user_data: BTreeMap<String, String> = [
            (SYNC_POINT_KEY.to_string(), self.target.uuid().to_string()),
            (IMPORTANT_KEY.to_string(), "yes".to_string()),
        ]
        .into_iter()
        .collect();
        self.source.create(
            self.driver(),
            "synchronization snapshot for snapsync",
            user_data,
        )
    }

    /// Which snapshot numbers the target's policy requires to exist
    ///
    /// The policy sees the union of what is already on the target and what
    /// could still be brought over.
    fn required_nums(
        &self,
        source_snapshots: &[SnapshotRecord],
        target_snapshots: &[SnapshotRecord],
    ) -> Result<BTreeSet<u64>> {
        let mut candidates: BTreeMap<u64, SnapshotRecord> = target_snapshots
            .iter()
            .map(|s| (s.num(), s.clone()))
            .collect();
        for snapshot in source_snapshots {
            candidates
                .entry(snapshot.num())
                .or_insert_with(|| snapshot.clone());
        }
        let candidates: Vec<SnapshotRecord> = candidates.into_values().collect();
        Ok(self
            .target
            .sync_policy()
            .filter(self.target.uuid(), &candidates))
    }

    /// Transfer one snapshot onto the target
    ///
    /// Idempotent: a complete copy on the target is a no-op. A partial or
    /// invalid copy is re-streamed from scratch. The partial marker is
    /// written before any data and removed only after the stream committed.
    pub fn synchronize_snapshot(
        &self,
        snapshot: &SnapshotRecord,
        parent: Option<&SnapshotRecord>,
    ) -> Result<()> {
        let target_dir = self.target.store().snapshot_dir(snapshot.num());
        if target_dir.exists() {
            match SnapshotRecord::open(&target_dir) {
                // The directory only counts as a committed copy when its
                // metadata actually describes this snapshot
                Ok(existing) if !existing.is_partial() && existing.num() == snapshot.num() => {
                    tracing::debug!(
                        "snapshot {} already present on {}",
                        snapshot.num(),
                        self.target.description()
                    );
                    return Ok(());
                }
                Ok(_) | Err(_) => {
                    tracing::info!(
                        "refreshing partially transferred snapshot {} on {}",
                        snapshot.num(),
                        self.target.description()
                    );
                    let stale = target_dir.join("snapshot");
                    if stale.is_dir() {
                        self.driver().delete_subvolume(&stale)?;
                    }
                }
            }
        } else {
            std::fs::create_dir(&target_dir)?;
        }

        // Mark before write
        std::fs::write(target_dir.join(snapsync_core::PARTIAL_MARKER), b"")?;
        write_info(&target_dir, snapshot.info())?;

        let estimate = match parent {
            Some(parent) => snapshot.size_diff_from(self.driver(), parent)?,
            None => snapshot.size(self.driver())?,
        };
        tracing::info!(
            "synchronizing snapshot {} to {} (estimated {}{})",
            snapshot.num(),
            self.target.description(),
            human_readable_size(estimate),
            match parent {
                Some(parent) => format!(", delta from {}", parent.num()),
                None => ", full send".to_string(),
            }
        );

        match self.copy_snapshot(snapshot, parent, &target_dir) {
            Ok(()) => {
                if let Err(e) = self.driver().sync_filesystem(&target_dir) {
                    tracing::warn!("filesystem sync after transfer failed: {}", e);
                }
                std::fs::remove_file(target_dir.join(snapsync_core::PARTIAL_MARKER))?;
                Ok(())
            }
            Err(e) => {
                // Leave no half-written snapshot behind
                let subvolume = target_dir.join("snapshot");
                if subvolume.is_dir() {
                    if let Err(cleanup) = self.driver().delete_subvolume(&subvolume) {
                        tracing::warn!(
                            "could not remove partial subvolume {}: {}",
                            subvolume.display(),
                            cleanup
                        );
                    }
                }
                if let Err(cleanup) = std::fs::remove_dir_all(&target_dir) {
                    tracing::warn!(
                        "could not remove partial snapshot directory {}: {}",
                        target_dir.display(),
                        cleanup
                    );
                }
                Err(e)
            }
        }
    }

    fn copy_snapshot(
        &self,
        snapshot: &SnapshotRecord,
        parent: Option<&SnapshotRecord>,
        target_dir: &std::path::Path,
    ) -> Result<()> {
        let parent_subvolume = parent.map(|p| p.subvolume_dir());
        let stream = self
            .driver()
            .send(&snapshot.subvolume_dir(), parent_subvolume.as_deref())?;
        let sink = self.driver().receive(target_dir)?;

        let started = Instant::now();
        let copied = copy_stream(stream, sink)?;
        let elapsed = started.elapsed().as_secs();
        tracing::info!(
            "transferred {} in {} ({}/s)",
            human_readable_size(copied),
            human_readable_time(elapsed),
            human_readable_size(copied / elapsed.max(1))
        );
        Ok(())
    }

    /// Drop every synchronization point for this target except the one that
    /// just transferred
    ///
    /// Bounds the accumulation of anchor snapshots on the source. Failures
    /// are logged and skipped; the source snapshot will be retried on the
    /// next run.
    fn remove_synchronization_points(&self, keep: &SnapshotRecord) -> Result<()> {
        for snapshot in self.source.each_snapshot()? {
            if snapshot.num() != keep.num()
                && snapshot.synchronization_point_for(self.target.uuid())
            {
                if let Err(e) = self.source.delete(self.driver(), &snapshot) {
                    tracing::warn!(
                        "could not remove stale synchronization point {}: {}",
                        snapshot.num(),
                        e
                    );
                }
            }
        }
        Ok(())
    }
}

/// Single-loop byte pump between the send stream and the receive sink
///
/// Alternates reads and writes in 1 MiB chunks and terminates at producer
/// EOF after flushing. Both sides are always driven to completion, even
/// when the pump aborts mid-stream: `finish` reaps the underlying tool, and
/// the caller's cleanup must not race a consumer that is still running.
/// The first error wins; later ones are logged.
fn copy_stream(
    mut stream: Box<dyn snapsync_core::SendStream>,
    mut sink: Box<dyn snapsync_core::ReceiveSink>,
) -> Result<u64> {
    let mut buffer = vec![0u8; COPY_CHUNK];
    let mut copied = 0u64;
    let mut last_report = Instant::now();
    let mut pump_error: Option<Error> = None;
    loop {
        let read = match stream.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(e) => {
                pump_error = Some(e.into());
                break;
            }
        };
        if let Err(e) = sink.write_all(&buffer[..read]) {
            pump_error = Some(e.into());
            break;
        }
        copied += read as u64;
        if last_report.elapsed() >= Duration::from_secs(1) {
            tracing::debug!("transferred {} so far", human_readable_size(copied));
            last_report = Instant::now();
        }
    }
    if pump_error.is_none() {
        if let Err(e) = sink.flush() {
            pump_error = Some(e.into());
        }
    }

    let stream_result = stream.finish();
    let sink_result = sink.finish();
    if let Some(e) = pump_error {
        if let Err(late) = stream_result {
            tracing::warn!("send side also failed: {}", late);
        }
        if let Err(late) = sink_result {
            tracing::warn!("receive side also failed: {}", late);
        }
        return Err(e);
    }
    stream_result.map_err(Error::Driver)?;
    sink_result.map_err(Error::Driver)?;
    Ok(copied)
}

/// The newest snapshot of the trailing synchronization-point run, when it
/// belongs to `target_uuid`
///
/// Scans newest to oldest: a snapshot that is no synchronization point at
/// all ends the scan, one tagged for another target is stepped over.
fn trailing_sync_snapshot<'a>(
    target_uuid: &str,
    snapshots: &'a [SnapshotRecord],
) -> Option<&'a SnapshotRecord> {
    for snapshot in snapshots.iter().rev() {
        if snapshot.synchronization_point_for(target_uuid) {
            return Some(snapshot);
        }
        if !snapshot.is_synchronization_point() {
            return None;
        }
    }
    None
}

/// The newest source snapshot that also exists on the target
fn last_common<'a>(
    source_snapshots: &'a [SnapshotRecord],
    target_nums: &BTreeSet<u64>,
) -> Option<&'a SnapshotRecord> {
    source_snapshots
        .iter()
        .filter(|s| target_nums.contains(&s.num()))
        .max_by_key(|s| s.num())
}
