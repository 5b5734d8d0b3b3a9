//! CLI command implementations

pub mod cleanup;
pub mod destroy;
pub mod init;
pub mod policy;
pub mod sync;

use anyhow::{Context, Result};
use snapsync_core::BtrfsDriver;
use snapsync_engine::Target;
use std::path::Path;
use std::sync::Arc;

/// Open an already-initialized target with the real btrfs driver
pub(crate) fn open_target(dir: &Path) -> Result<Target> {
    Target::open(dir, Arc::new(BtrfsDriver::new()), false)
        .with_context(|| format!("failed to open target {}", dir.display()))
}
