//! # tessera-txn
//!
//! Transaction manager for Tessera.
//!
//! This crate provides:
//!
//! - **Transaction Lifecycle**: begin, commit and rollback, with commit
//!   records made durable in the WAL before a commit is acknowledged.
//!
//! - **Isolation Levels**: read uncommitted, read committed, repeatable read
//!   and serializable, built on the snapshots of `tessera-mvcc`.
//!
//! - **Lock Management**: exclusive row locks under intention-exclusive table
//!   locks, with bounded waits and wait-for graph deadlock detection.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                    TransactionManager                          │
//! │                           │                                    │
//! │    ┌──────────────────────┼──────────────────────┐             │
//! │    │                      │                      │             │
//! │    ▼                      ▼                      ▼             │
//! │ ┌─────────────┐  ┌─────────────────┐    ┌──────────────────┐   │
//! │ │ CommitClock │  │ ConflictTracker │    │   LockManager    │   │
//! │ │ Watermark   │  │  (serializable) │    │ (wait-for graph) │   │
//! │ └─────────────┘  └─────────────────┘    └──────────────────┘   │
//! │                           │                                    │
//! │                           ▼                                    │
//! │                    ┌─────────────┐                             │
//! │                    │     Wal     │                             │
//! │                    └─────────────┘                             │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The manager never touches row data directly. Storage registers each write
//! together with a [`tessera_mvcc::VersionHandle`] so commit can stamp and
//! rollback can discard the pending versions.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Transaction lifecycle management.
///
/// This module provides:
/// - [`manager::TransactionManager`]: Main coordinator for transactions
/// - [`manager::TransactionState`]: Transaction lifecycle states
/// - [`manager::WriteRecord`]: A pending write and its log images
pub mod manager;

/// Lock table implementation.
///
/// This module provides:
/// - [`lock::LockManager`]: Manages all locks
/// - [`lock::LockMode`]: Exclusive and intention-exclusive locks
/// - [`lock::ResourceId`]: Identifies lockable resources
pub mod lock;

pub use manager::{
    TransactionError, TransactionManager, TransactionManagerConfig, TransactionState,
    TransactionStats, TxnResult, WriteKind, WriteRecord,
};

pub use lock::{LockError, LockGrant, LockManager, LockManagerConfig, LockMode, LockResult, LockStats, ResourceId};
