//! Snapshot data model and filesystem driver for snapsync
//!
//! This crate provides:
//! - Snapshot records and the on-disk snapshot directory layout
//! - The filesystem driver capability (`Driver`) and its btrfs implementation
//! - The error taxonomy shared across the workspace

pub mod btrfs;
pub mod driver;
pub mod error;
pub mod snapshot;
pub mod store;
pub mod util;

// Re-exports
pub use btrfs::BtrfsDriver;
pub use driver::{ChangeRecord, Driver, DriverError, ReceiveSink, SendStream, SubvolumeInfo};
pub use error::{Error, Result};
pub use snapshot::{SnapshotInfo, SnapshotRecord, IMPORTANT_KEY, PARTIAL_MARKER, SYNC_POINT_KEY};
pub use store::{RawSnapshot, SnapshotStore, Source};
