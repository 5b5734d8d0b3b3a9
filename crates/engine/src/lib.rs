//! Snapshot synchronization and retention engine
//!
//! This crate provides:
//! - Retention policies (default, keep-last, timeline) and their config
//!   round-trip
//! - The transfer engine: chain selection, delta parents, partial-transfer
//!   recovery
//! - The cleanup engine and its policy contract checks
//! - Target identity and persisted configuration

pub mod cleanup;
pub mod policy;
pub mod sync;
pub mod target;
pub mod timeline;
pub mod transfer;

#[cfg(test)]
mod testutil;

// Re-exports
pub use cleanup::Cleanup;
pub use policy::SyncPolicy;
pub use sync::Sync;
pub use target::Target;
pub use timeline::{Period, TimelinePolicy};
pub use transfer::TransferEngine;
