//! The filesystem driver capability
//!
//! The transfer and retention engines depend only on this trait, never on
//! which implementation is active. `BtrfsDriver` drives the real `btrfs`
//! tool; tests plug in an in-memory mock.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A driver operation failed
///
/// Carries the captured diagnostic output (stderr lines) of the underlying
/// tool so failures can be reported verbatim.
#[derive(Debug, Error)]
#[error("{command} failed: {message}")]
pub struct DriverError {
    /// The operation or command line that failed
    pub command: String,
    /// Short human-readable failure description
    pub message: String,
    /// Captured stderr lines, prefixed for context
    pub stderr: Vec<String>,
}

impl DriverError {
    pub fn new(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            message: message.into(),
            stderr: Vec::new(),
        }
    }

    pub fn with_stderr(mut self, lines: Vec<String>) -> Self {
        self.stderr = lines;
        self
    }
}

/// One subvolume as reported by the driver's listing operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubvolumeInfo {
    pub id: u64,
    pub uuid: String,
    pub parent_uuid: Option<String>,
    pub received_uuid: Option<String>,
    pub generation: u64,
    pub path: PathBuf,
}

/// One change reported by `find_new`; only the byte length matters to the
/// engine (transfer size estimation)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeRecord {
    pub len: u64,
}

/// The byte stream produced by a `send` operation
///
/// `finish` must be called after EOF; it surfaces the producer's exit status
/// and captured stderr.
pub trait SendStream: Read + Send {
    fn finish(self: Box<Self>) -> Result<(), DriverError>;
}

/// The byte sink of a `receive` operation
///
/// `finish` closes the sink and surfaces the consumer's exit status. Bytes
/// must be forwarded in the order produced by the sender; the sink is only
/// complete once `finish` returns Ok.
pub trait ReceiveSink: Write + Send {
    fn finish(self: Box<Self>) -> Result<(), DriverError>;
}

/// Abstract filesystem tool capability
///
/// Every operation is blocking from the engine's point of view. All failures
/// are structured `DriverError`s; the engine treats them as fatal to the
/// current operation.
pub trait Driver: Send + Sync {
    /// List the subvolumes below a mountpoint
    fn list_subvolumes(&self, mountpoint: &Path) -> Result<Vec<SubvolumeInfo>, DriverError>;

    /// The generation counter of a subvolume
    fn generation_of(&self, subvolume: &Path) -> Result<u64, DriverError>;

    /// Changes between a reference generation and the subvolume's current
    /// state
    fn find_new(
        &self,
        subvolume: &Path,
        since_generation: u64,
    ) -> Result<Vec<ChangeRecord>, DriverError>;

    /// Open a send stream for a subvolume, incremental against `parent` when
    /// given
    fn send(
        &self,
        subvolume: &Path,
        parent: Option<&Path>,
    ) -> Result<Box<dyn SendStream>, DriverError>;

    /// Open a receive sink that materializes a subvolume inside `target_dir`
    fn receive(&self, target_dir: &Path) -> Result<Box<dyn ReceiveSink>, DriverError>;

    /// Create a read-only snapshot of `source` at `dest`
    fn snapshot(&self, source: &Path, dest: &Path) -> Result<(), DriverError>;

    /// Delete a subvolume
    fn delete_subvolume(&self, subvolume: &Path) -> Result<(), DriverError>;

    /// Flush the filesystem containing `path`
    fn sync_filesystem(&self, path: &Path) -> Result<(), DriverError>;

    /// Wait until pending subvolume deletions below `path` are committed
    fn wait_deletions(&self, path: &Path) -> Result<(), DriverError>;
}
