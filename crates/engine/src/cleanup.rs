//! Retention enforcement on a target
//!
//! Applies the target's cleanup policy and deletes what it discards. The
//! policy output is checked against two hard contracts before anything is
//! touched: the keep set must be non-empty, and it must not contain a
//! synchronization point other than the protected anchor. A violation means
//! a policy bug, so cleanup aborts without deleting anything.

use crate::policy::{newest_sync_point, SyncPolicy};
use crate::target::Target;
use snapsync_core::{Error, Result, SnapshotRecord};
use std::collections::BTreeSet;

pub struct Cleanup {
    policy: SyncPolicy,
}

impl Cleanup {
    pub fn new(policy: SyncPolicy) -> Self {
        Self { policy }
    }

    /// Delete the snapshots the policy discards, oldest first
    ///
    /// Returns the number of snapshots removed. Individual deletion failures
    /// are logged and skipped; a policy contract violation aborts the whole
    /// pass with [`Error::PolicyViolation`].
    pub fn cleanup(&self, target: &Target, dry_run: bool) -> Result<usize> {
        let snapshots = target.each_snapshot()?;
        let mut keep = self.policy.filter(target.uuid(), &snapshots);

        let anchor =
            check_policy_output(&target.description(), target.uuid(), &keep, &snapshots)?;
        // The anchor survives no matter what the policy said: it is the
        // parent of the next incremental transfer
        if let Some(num) = anchor {
            keep.insert(num);
        }

        let mut removed = 0;
        for snapshot in &snapshots {
            if keep.contains(&snapshot.num()) {
                continue;
            }
            match target.delete(snapshot, dry_run) {
                Ok(()) => removed += 1,
                Err(e) => {
                    tracing::warn!(
                        "failed to remove snapshot {} from {}: {}",
                        snapshot.num(),
                        target.description(),
                        e
                    );
                }
            }
        }

        if removed > 0 && !dry_run {
            // Make freed space visible before reporting; failures here do
            // not undo the deletions
            if let Err(e) = target.driver().sync_filesystem(target.dir()) {
                tracing::warn!("filesystem sync after cleanup failed: {}", e);
            }
            if let Err(e) = target.driver().wait_deletions(target.dir()) {
                tracing::warn!("waiting for subvolume deletions failed: {}", e);
            }
        }
        Ok(removed)
    }
}

/// Validate a policy's keep set before anything is deleted
///
/// The keep set must be non-empty, and any synchronization point it retains
/// must be the protected anchor (the newest one for this target). Returns
/// the anchor's number.
fn check_policy_output(
    description: &str,
    target_uuid: &str,
    keep: &BTreeSet<u64>,
    snapshots: &[SnapshotRecord],
) -> Result<Option<u64>> {
    if keep.is_empty() {
        return Err(Error::PolicyViolation(format!(
            "cleanup policy for {description} would remove every snapshot"
        )));
    }
    let anchor = newest_sync_point(target_uuid, snapshots).map(|s| s.num());
    for snapshot in snapshots {
        if keep.contains(&snapshot.num())
            && snapshot.is_synchronization_point()
            && Some(snapshot.num()) != anchor
        {
            return Err(Error::PolicyViolation(format!(
                "cleanup policy for {description} kept synchronization point {}",
                snapshot.num()
            )));
        }
    }
    Ok(anchor)
}
