//! snapsync CLI - incremental btrfs snapshot replication

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

/// snapsync - replicate btrfs snapshots to backup targets
#[derive(Parser)]
#[command(name = "snapsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a directory as a snapsync target
    Init {
        /// Target directory
        target: PathBuf,
        /// Policy type (default, last, timeline)
        #[arg(long, default_value = "default")]
        policy: String,
        /// Policy options (e.g. day 10 month 6 for timeline)
        options: Vec<String>,
    },
    /// Synchronize a source subvolume's snapshots to a target
    Sync {
        /// The live subvolume being backed up
        #[arg(long)]
        subvolume: PathBuf,
        /// Directory holding the source's numbered snapshots
        #[arg(long)]
        snapshots: PathBuf,
        /// Target directory
        target: PathBuf,
        /// Run cleanup after a successful sync, overriding the target config
        #[arg(long, overrides_with = "no_autoclean")]
        autoclean: bool,
        /// Skip cleanup after sync, overriding the target config
        #[arg(long)]
        no_autoclean: bool,
    },
    /// Apply the target's cleanup policy
    Cleanup {
        /// Target directory
        target: PathBuf,
        /// Log what would be removed without deleting anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Change a target's retention policy
    Policy {
        /// Target directory
        target: PathBuf,
        /// Policy type (default, last, timeline)
        policy: String,
        /// Policy options
        options: Vec<String>,
    },
    /// Delete every snapshot on a target and remove it
    Destroy {
        /// Target directory
        target: PathBuf,
        /// Log what would be removed without deleting anything
        #[arg(long)]
        dry_run: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Init {
            target,
            policy,
            options,
        } => cmd::init::run(&target, &policy, &options),
        Commands::Sync {
            subvolume,
            snapshots,
            target,
            autoclean,
            no_autoclean,
        } => {
            let autoclean = if autoclean {
                Some(true)
            } else if no_autoclean {
                Some(false)
            } else {
                None
            };
            cmd::sync::run(&subvolume, &snapshots, &target, autoclean)
        }
        Commands::Cleanup { target, dry_run } => cmd::cleanup::run(&target, dry_run),
        Commands::Policy {
            target,
            policy,
            options,
        } => cmd::policy::run(&target, &policy, &options),
        Commands::Destroy { target, dry_run } => cmd::destroy::run(&target, dry_run),
    }
}
