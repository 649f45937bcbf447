//! Logical commit clock.
//!
//! Commit timestamps are plain counters. Two values are tracked:
//!
//! - `issued`: the last timestamp handed to a committing transaction
//! - `visible`: the last timestamp whose versions are all stamped
//!
//! New snapshots read `visible`, so a commit is observed either completely
//! or not at all. Commits are serialized by the transaction manager, which
//! publishes each timestamp after stamping its versions.

use std::sync::atomic::{AtomicU64, Ordering};

use tessera_common::Timestamp;

/// Source of commit timestamps and snapshot read points.
#[derive(Debug)]
pub struct CommitClock {
    issued: AtomicU64,
    visible: AtomicU64,
}

impl CommitClock {
    /// Creates a clock whose last commit is `start`.
    pub fn new(start: Timestamp) -> Self {
        Self {
            issued: AtomicU64::new(start.as_u64()),
            visible: AtomicU64::new(start.as_u64()),
        }
    }

    /// Returns the newest fully visible commit timestamp.
    pub fn visible(&self) -> Timestamp {
        Timestamp::new(self.visible.load(Ordering::Acquire))
    }

    /// Issues the next commit timestamp.
    pub fn next_commit(&self) -> Timestamp {
        Timestamp::new(self.issued.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Makes `ts` visible to new snapshots.
    pub fn publish(&self, ts: Timestamp) {
        self.visible.fetch_max(ts.as_u64(), Ordering::AcqRel);
    }

    /// Moves both counters forward to at least `ts` (used after recovery).
    pub fn advance_to(&self, ts: Timestamp) {
        self.issued.fetch_max(ts.as_u64(), Ordering::AcqRel);
        self.visible.fetch_max(ts.as_u64(), Ordering::AcqRel);
    }
}

impl Default for CommitClock {
    fn default() -> Self {
        Self::new(Timestamp::ZERO)
    }
}
