//! Watermark-based garbage collection support.
//!
//! Every active transaction pins the commit timestamp that was visible when
//! it began. The watermark is the smallest pinned timestamp, or the current
//! visible timestamp if nothing is pinned. Versions superseded at or below
//! the watermark can never be read again.
//!
//! ```text
//!  visible:   1 ─── 2 ─── 3 ─── 4 ─── 5 ─── 6
//!                         ▲           ▲
//!                      T7 began    T9 began
//!
//!  watermark = 3
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use parking_lot::Mutex;
use tessera_common::Timestamp;

use crate::clock::CommitClock;

/// Tracks the begin timestamps pinned by active transactions.
#[derive(Debug, Default)]
pub struct Watermark {
    pinned: Mutex<BTreeMap<Timestamp, usize>>,
}

impl Watermark {
    /// Creates an empty watermark tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins the clock's visible timestamp for a newly begun transaction and
    /// returns it.
    ///
    /// The clock is read under the same lock [`Watermark::watermark`] takes,
    /// so a concurrent collection never computes a watermark above a
    /// timestamp that is about to be pinned.
    pub fn pin(&self, clock: &CommitClock) -> Timestamp {
        let mut pinned = self.pinned.lock();
        let ts = clock.visible();
        *pinned.entry(ts).or_insert(0) += 1;
        ts
    }

    /// Releases one pin on `ts`.
    pub fn unpin(&self, ts: Timestamp) {
        let mut pinned = self.pinned.lock();
        if let Some(count) = pinned.get_mut(&ts) {
            *count -= 1;
            if *count == 0 {
                pinned.remove(&ts);
            }
        }
    }

    /// Returns the current watermark.
    pub fn watermark(&self, clock: &CommitClock) -> Timestamp {
        let pinned = self.pinned.lock();
        let visible = clock.visible();
        pinned
            .keys()
            .next()
            .copied()
            .map_or(visible, |ts| ts.min(visible))
    }

    /// Returns the number of pinned transactions.
    pub fn pinned_count(&self) -> usize {
        self.pinned.lock().values().sum()
    }
}

/// Garbage collection statistics.
#[derive(Debug, Default)]
pub struct GcStats {
    /// Number of collection passes.
    pub runs: AtomicU64,
    /// Versions removed from chains.
    pub versions_pruned: AtomicU64,
    /// Rows removed entirely.
    pub rows_removed: AtomicU64,
    /// Stale index entries dropped.
    pub index_entries_removed: AtomicU64,
    /// Finished transactions forgotten.
    pub transactions_forgotten: AtomicU64,
}

impl GcStats {
    /// Creates zeroed statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the outcome of one pass.
    pub fn record_run(&self, versions: u64, rows: u64, index_entries: u64, transactions: u64) {
        self.runs.fetch_add(1, AtomicOrdering::Relaxed);
        self.versions_pruned.fetch_add(versions, AtomicOrdering::Relaxed);
        self.rows_removed.fetch_add(rows, AtomicOrdering::Relaxed);
        self.index_entries_removed
            .fetch_add(index_entries, AtomicOrdering::Relaxed);
        self.transactions_forgotten
            .fetch_add(transactions, AtomicOrdering::Relaxed);
    }
}

impl fmt::Display for GcStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GcStats {{ runs: {}, versions: {}, rows: {}, index entries: {}, txns: {} }}",
            self.runs.load(AtomicOrdering::Relaxed),
            self.versions_pruned.load(AtomicOrdering::Relaxed),
            self.rows_removed.load(AtomicOrdering::Relaxed),
            self.index_entries_removed.load(AtomicOrdering::Relaxed),
            self.transactions_forgotten.load(AtomicOrdering::Relaxed),
        )
    }
}
