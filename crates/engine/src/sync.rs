//! Per-target synchronization runner
//!
//! Ties the pieces together for one source/target pair: repair leftovers
//! from a crashed run, transfer, then enforce retention when autocleaning.
//! Callers must guarantee one run at a time per target directory.

use crate::cleanup::Cleanup;
use crate::target::{remove_entry, Target};
use crate::transfer::TransferEngine;
use snapsync_core::{RawSnapshot, Result, Source};

pub struct Sync<'a> {
    source: &'a Source,
    target: &'a Target,
    autoclean: Option<bool>,
}

impl<'a> Sync<'a> {
    pub fn new(source: &'a Source, target: &'a Target) -> Self {
        Self {
            source,
            target,
            autoclean: None,
        }
    }

    /// Override the target's persisted autoclean flag for this run
    pub fn autoclean(mut self, autoclean: Option<bool>) -> Self {
        self.autoclean = autoclean;
        self
    }

    fn should_autoclean(&self) -> bool {
        self.autoclean.unwrap_or_else(|| self.target.autoclean())
    }

    /// One full pass: repair, transfer, clean up
    pub fn run(&self) -> Result<()> {
        if !self.target.enabled() {
            tracing::info!("{} is disabled, skipping", self.target.description());
            return Ok(());
        }

        self.remove_partially_synchronized_snapshots()?;
        TransferEngine::new(self.source, self.target).sync()?;

        if !self.should_autoclean() {
            return Ok(());
        }
        match self.target.cleanup_policy() {
            Some(policy) => {
                let removed =
                    Cleanup::new(policy.clone()).cleanup(self.target, false)?;
                tracing::info!(
                    "removed {} snapshot(s) from {}",
                    removed,
                    self.target.description()
                );
            }
            None => {
                tracing::debug!(
                    "{} uses a policy without cleanup, nothing to do",
                    self.target.description()
                );
            }
        }
        Ok(())
    }

    /// Delete target entries left partial or invalid by a crashed run
    ///
    /// Best effort: a stuck entry is logged and skipped, the next run will
    /// see it again.
    pub fn remove_partially_synchronized_snapshots(&self) -> Result<()> {
        for raw in self.target.store().each_snapshot_raw()? {
            let stale = match &raw {
                RawSnapshot::Valid(snapshot) => {
                    snapshot.is_partial() || !snapshot.num_matches_directory()
                }
                RawSnapshot::Invalid { .. } => true,
            };
            if !stale {
                continue;
            }
            tracing::info!(
                "removing partially synchronized snapshot at {}",
                raw.path().display()
            );
            if let Err(e) = remove_entry(self.target.driver(), raw.path()) {
                tracing::warn!("could not remove {}: {}", raw.path().display(), e);
            }
        }
        Ok(())
    }
}
