//! Apply a target's cleanup policy

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use snapsync_engine::Cleanup;
use std::path::Path;

pub fn run(target_dir: &Path, dry_run: bool) -> Result<()> {
    let target = super::open_target(target_dir)?;
    let Some(policy) = target.cleanup_policy().cloned() else {
        println!(
            "{}",
            "This target's policy never removes snapshots, nothing to do".dimmed()
        );
        return Ok(());
    };

    let removed = Cleanup::new(policy)
        .cleanup(&target, dry_run)
        .with_context(|| format!("cleanup of {} failed", target.description()))?;

    if dry_run {
        println!("Would remove {} snapshot(s)", removed.to_string().yellow());
    } else {
        println!("Removed {} snapshot(s)", removed.to_string().yellow());
    }
    Ok(())
}
