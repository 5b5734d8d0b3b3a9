//! Synchronization and retention policies
//!
//! A policy is a pure function over a sequence of snapshot records that
//! classifies each as "keep" or "discardable". The same policies drive both
//! the sync-time required set and the cleanup keep set. Every variant always
//! retains the newest synchronization point for the current target: that
//! snapshot anchors the next incremental transfer and losing it would force
//! a full resend.

use crate::timeline::TimelinePolicy;
use chrono::Utc;
use snapsync_core::{Error, Result, SnapshotRecord};
use std::collections::BTreeSet;

/// A retention policy over snapshot records
#[derive(Debug, Clone)]
pub enum SyncPolicy {
    /// Copy everything except foreign synchronization points
    Default,
    /// Mirror only the latest state: keep the newest synchronization point
    /// for the current target
    KeepLast,
    /// Keep one snapshot per configured time period
    Timeline(TimelinePolicy),
}

impl SyncPolicy {
    /// Translate a persisted `(type, options)` pair into the sync policy and
    /// the optional cleanup policy
    ///
    /// The default policy has no cleanup counterpart: targets using it are
    /// never auto-cleaned.
    pub fn parse(kind: &str, options: &[String]) -> Result<(SyncPolicy, Option<SyncPolicy>)> {
        match kind {
            "default" => Ok((SyncPolicy::Default, None)),
            "last" => Ok((SyncPolicy::KeepLast, Some(SyncPolicy::KeepLast))),
            "timeline" => {
                let policy = TimelinePolicy::from_config(Utc::now(), options)?;
                Ok((
                    SyncPolicy::Timeline(policy.clone()),
                    Some(SyncPolicy::Timeline(policy)),
                ))
            }
            other => Err(Error::InvalidConfiguration(format!(
                "synchronization policy '{other}' does not exist"
            ))),
        }
    }

    /// The policy type as persisted in the target config
    pub fn kind(&self) -> &'static str {
        match self {
            SyncPolicy::Default => "default",
            SyncPolicy::KeepLast => "last",
            SyncPolicy::Timeline(_) => "timeline",
        }
    }

    /// The policy options as persisted in the target config
    pub fn to_config(&self) -> Vec<String> {
        match self {
            SyncPolicy::Default | SyncPolicy::KeepLast => Vec::new(),
            SyncPolicy::Timeline(policy) => policy.to_config(),
        }
    }

    /// Classify `candidates` and return the numbers of the records to keep
    ///
    /// Pure function of the inputs and the policy's own reference time; no
    /// side effects, no I/O.
    pub fn filter(&self, target_uuid: &str, candidates: &[SnapshotRecord]) -> BTreeSet<u64> {
        match self {
            SyncPolicy::Default => default_filter(target_uuid, candidates),
            SyncPolicy::KeepLast => newest_sync_point(target_uuid, candidates)
                .map(|s| s.num())
                .into_iter()
                .collect(),
            SyncPolicy::Timeline(policy) => policy.filter(target_uuid, candidates),
        }
    }
}

/// Keep every record that is not a synchronization point for any target,
/// plus the single newest synchronization point for this target
pub(crate) fn default_filter(
    target_uuid: &str,
    candidates: &[SnapshotRecord],
) -> BTreeSet<u64> {
    let mut keep: BTreeSet<u64> = candidates
        .iter()
        .filter(|s| !s.is_synchronization_point())
        .map(|s| s.num())
        .collect();
    if let Some(anchor) = newest_sync_point(target_uuid, candidates) {
        keep.insert(anchor.num());
    }
    keep
}

/// The newest synchronization point for the given target, if any
pub(crate) fn newest_sync_point<'a>(
    target_uuid: &str,
    candidates: &'a [SnapshotRecord],
) -> Option<&'a SnapshotRecord> {
    candidates
        .iter()
        .filter(|s| s.synchronization_point_for(target_uuid))
        .max_by_key(|s| s.num())
}
