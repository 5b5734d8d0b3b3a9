//! Synchronize a source subvolume's snapshots to a target

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use snapsync_core::Source;
use snapsync_engine::Sync;
use std::path::Path;

pub fn run(
    subvolume: &Path,
    snapshots: &Path,
    target_dir: &Path,
    autoclean: Option<bool>,
) -> Result<()> {
    let target = super::open_target(target_dir)?;
    let source = Source::new(subvolume, snapshots);

    Sync::new(&source, &target)
        .autoclean(autoclean)
        .run()
        .with_context(|| format!("synchronization to {} failed", target.description()))?;

    println!(
        "{} {}",
        "Synchronized".green().bold(),
        target.description()
    );
    Ok(())
}
