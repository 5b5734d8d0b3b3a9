//! Error taxonomy shared across the workspace
//!
//! Configuration problems and policy contract violations get their own
//! variants so callers can tell "fix your config" apart from "a tool
//! invocation failed" and from "a policy returned something it must not".

use crate::driver::DriverError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The directory does not hold a valid snapshot
    #[error("{0} is not a valid snapshot directory")]
    InvalidSnapshot(PathBuf),

    /// The snapshot's metadata file exists but cannot be parsed
    #[error("cannot parse {path}: {reason}")]
    InvalidInfoFile { path: PathBuf, reason: String },

    /// A policy type, policy option or config file is malformed
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The directory was never initialized as a target
    #[error("{0} is not initialized as a snapsync target")]
    NeedsInitialization(PathBuf),

    /// A retention policy broke its output contract
    #[error("policy contract violation: {0}")]
    PolicyViolation(String),

    /// The underlying filesystem tool failed
    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
