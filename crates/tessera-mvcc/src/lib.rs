//! # tessera-mvcc
//!
//! Multi-version concurrency control for Tessera.
//!
//! This crate implements:
//! - A logical commit clock
//! - Version chains with per-version commit timestamps
//! - Snapshot visibility for the four isolation levels
//! - Read/write tracking for serializable validation
//! - The garbage collection watermark

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Logical commit clock
pub mod clock;

/// Version chain storage
pub mod version;

/// Watermark-based garbage collection
pub mod gc;

/// Snapshots and serializable conflict tracking
pub mod snapshot;

pub use clock::CommitClock;
pub use gc::{GcStats, Watermark};
pub use snapshot::{ConflictError, ConflictTracker, IsolationLevel, ReadItem, Snapshot};
pub use version::{Pruned, Version, VersionChain, VersionHandle, VersionId, VersionIdGenerator, VersionState};
