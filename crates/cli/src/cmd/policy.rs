//! Change a target's retention policy

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use std::path::Path;

pub fn run(target_dir: &Path, policy: &str, options: &[String]) -> Result<()> {
    let mut target = super::open_target(target_dir)?;
    target
        .change_policy(policy, options)
        .context("failed to change the policy")?;

    println!(
        "{} {} now uses policy {} {}",
        "Updated".green().bold(),
        target.description(),
        policy,
        options.join(" ")
    );
    Ok(())
}
