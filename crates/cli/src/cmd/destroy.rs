//! Delete every snapshot on a target and remove it

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use std::path::Path;

pub fn run(target_dir: &Path, dry_run: bool) -> Result<()> {
    let target = super::open_target(target_dir)?;
    let description = target.description();
    target
        .destroy(dry_run)
        .with_context(|| format!("failed to destroy {description}"))?;

    if dry_run {
        println!("Would destroy {description}");
    } else {
        println!("{} {}", "Destroyed".red().bold(), description);
    }
    Ok(())
}
