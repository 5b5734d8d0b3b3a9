//! Initialize a directory as a snapsync target

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use snapsync_core::BtrfsDriver;
use snapsync_engine::Target;
use std::path::Path;
use std::sync::Arc;

pub fn run(dir: &Path, policy: &str, options: &[String]) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;

    let mut target = Target::open(dir, Arc::new(BtrfsDriver::new()), true)
        .with_context(|| format!("failed to initialize target {}", dir.display()))?;
    if policy != target.sync_policy().kind() || !options.is_empty() {
        target.change_policy(policy, options)?;
    }

    println!(
        "{} {}",
        "Initialized target".green().bold(),
        target.description()
    );
    println!("  uuid:   {}", target.uuid());
    println!(
        "  policy: {} {}",
        target.sync_policy().kind(),
        target.sync_policy().to_config().join(" ")
    );
    Ok(())
}
