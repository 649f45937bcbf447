//! Version chain storage and management.
//!
//! Every row is a chain of versions, newest first. A version is written by
//! one transaction and stays `Pending` until that transaction commits (it is
//! then stamped with the commit timestamp) or aborts. A version with no data
//! is a tombstone left by a delete.
//!
//! # Version Chain Structure
//!
//! ```text
//! RowId 17
//! ┌──────────────────────────────────────────────┐
//! │ v9  Pending    txn 12   data: None (delete)  │
//! │               ↓                              │
//! │ v6  Committed  ts 5     data: (1, "Alice")   │
//! │               ↓                              │
//! │ v2  Committed  ts 2     data: (1, "Alicia")  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! A transaction's row write lock guarantees at most one transaction has
//! pending versions on a chain at a time.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use parking_lot::RwLock;
use tessera_common::{Timestamp, TxnId};

use crate::snapshot::Snapshot;

/// A unique identifier for a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionId(u64);

impl VersionId {
    /// Invalid version ID.
    pub const INVALID: Self = Self(0);

    /// Creates a new version ID.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw u64 value.
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// The state of a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionState {
    /// Writer still in progress.
    Pending,
    /// Writer committed; `commit_ts` is set.
    Committed,
    /// Writer aborted or the statement was rolled back.
    Aborted,
}

/// A single version of a row.
#[derive(Debug, Clone)]
pub struct Version<T> {
    /// Unique identifier for this version.
    pub id: VersionId,
    /// Transaction that created this version.
    pub created_by: TxnId,
    /// Commit timestamp, once committed.
    pub commit_ts: Option<Timestamp>,
    /// Current state of the version.
    pub state: VersionState,
    /// Row contents; `None` marks a deletion.
    pub data: Option<T>,
}

impl<T> Version<T> {
    /// Creates a pending version.
    pub fn pending(id: VersionId, created_by: TxnId, data: Option<T>) -> Self {
        Self {
            id,
            created_by,
            commit_ts: None,
            state: VersionState::Pending,
            data,
        }
    }

    /// Creates an already committed version.
    pub fn committed(id: VersionId, commit_ts: Timestamp, data: Option<T>) -> Self {
        Self {
            id,
            created_by: TxnId::INVALID,
            commit_ts: Some(commit_ts),
            state: VersionState::Committed,
            data,
        }
    }

    /// Checks if this version is visible in the given snapshot.
    pub fn is_visible_to(&self, snapshot: &Snapshot) -> bool {
        if self.state == VersionState::Aborted {
            return false;
        }
        if self.created_by == snapshot.txn_id() && self.created_by.is_valid() {
            return true;
        }
        match snapshot.read_ts() {
            // Dirty reads: anything not aborted
            None => true,
            Some(read_ts) => self.commit_ts.map_or(false, |ts| ts <= read_ts),
        }
    }

    /// Returns true if this version is a tombstone.
    pub fn is_tombstone(&self) -> bool {
        self.data.is_none()
    }
}

/// Type-erased commit/abort access to a chain.
///
/// The transaction manager keeps one handle per write so it can stamp or
/// discard versions without knowing the row type.
pub trait VersionHandle: Send + Sync {
    /// Marks a pending version as committed at `commit_ts`.
    fn commit_version(&self, id: VersionId, commit_ts: Timestamp) -> bool;
    /// Marks a pending version as aborted.
    fn abort_version(&self, id: VersionId) -> bool;
}

/// Outcome of pruning a chain.
#[derive(Debug)]
pub struct Pruned<T> {
    /// Data of the removed versions, for index cleanup.
    pub removed: Vec<T>,
    /// Number of versions removed (including tombstones).
    pub removed_versions: usize,
    /// True if nothing live remains and the chain can be dropped.
    pub dead: bool,
}

/// A chain of versions for a single row, newest first.
#[derive(Debug)]
pub struct VersionChain<T> {
    versions: RwLock<Vec<Version<T>>>,
}

impl<T: Clone> VersionChain<T> {
    /// Creates a new empty version chain.
    pub fn new() -> Self {
        Self {
            versions: RwLock::new(Vec::new()),
        }
    }

    /// Creates a chain holding one committed version.
    pub fn with_committed(id: VersionId, commit_ts: Timestamp, data: Option<T>) -> Self {
        Self {
            versions: RwLock::new(vec![Version::committed(id, commit_ts, data)]),
        }
    }

    /// Returns the number of versions in the chain.
    pub fn len(&self) -> usize {
        self.versions.read().len()
    }

    /// Returns true if the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.versions.read().is_empty()
    }

    /// Adds a pending version on top of the chain.
    pub fn push(&self, id: VersionId, created_by: TxnId, data: Option<T>) {
        self.versions
            .write()
            .insert(0, Version::pending(id, created_by, data));
    }

    /// Returns the row contents visible in `snapshot`, or `None` if the row
    /// does not exist there.
    pub fn read(&self, snapshot: &Snapshot) -> Option<T> {
        let versions = self.versions.read();
        versions
            .iter()
            .find(|v| v.is_visible_to(snapshot))
            .and_then(|v| v.data.clone())
    }

    /// Returns every state the row may end up in once in-flight writers
    /// resolve, as seen by `txn_id`.
    ///
    /// - own newest write: just that state
    /// - another transaction's pending write: that state and the committed
    ///   state beneath it
    /// - otherwise: the newest committed state
    ///
    /// `None` entries mean "row absent" in that outcome.
    pub fn possible_states(&self, txn_id: TxnId) -> Vec<Option<T>> {
        let versions = self.versions.read();
        let mut live = versions.iter().filter(|v| v.state != VersionState::Aborted);
        let Some(top) = live.next() else {
            return vec![None];
        };

        if top.state == VersionState::Pending && top.created_by != txn_id {
            let committed = live
                .find(|v| v.state == VersionState::Committed)
                .and_then(|v| v.data.clone());
            vec![top.data.clone(), committed]
        } else {
            vec![top.data.clone()]
        }
    }

    /// Returns the transaction holding pending versions, if any.
    pub fn pending_writer(&self) -> Option<TxnId> {
        let versions = self.versions.read();
        versions
            .iter()
            .find(|v| v.state != VersionState::Aborted)
            .filter(|v| v.state == VersionState::Pending)
            .map(|v| v.created_by)
    }

    /// Returns the newest committed version's timestamp and contents.
    pub fn latest_committed(&self) -> Option<(Timestamp, Option<T>)> {
        let versions = self.versions.read();
        versions
            .iter()
            .find(|v| v.state == VersionState::Committed)
            .and_then(|v| v.commit_ts.map(|ts| (ts, v.data.clone())))
    }

    /// Returns the contents of every non-aborted version.
    pub fn all_data(&self) -> Vec<T> {
        let versions = self.versions.read();
        versions
            .iter()
            .filter(|v| v.state != VersionState::Aborted)
            .filter_map(|v| v.data.clone())
            .collect()
    }

    /// Removes versions no snapshot at or after `watermark` can see.
    ///
    /// Aborted versions always go. Of the committed versions, the newest one
    /// at or below the watermark is kept and everything older is dropped.
    pub fn prune(&self, watermark: Timestamp) -> Pruned<T> {
        let mut versions = self.versions.write();
        let before = versions.len();
        let mut removed = Vec::new();

        let base = versions.iter().position(|v| {
            v.state == VersionState::Committed && v.commit_ts.map_or(false, |ts| ts <= watermark)
        });

        let mut index = 0;
        versions.retain(|v| {
            let keep = v.state != VersionState::Aborted && base.map_or(true, |b| index <= b);
            index += 1;
            if !keep {
                if let Some(data) = &v.data {
                    removed.push(data.clone());
                }
            }
            keep
        });

        // A committed tombstone with nothing newer is invisible to everyone
        let dead = match versions.as_slice() {
            [] => true,
            [only] => {
                only.is_tombstone()
                    && only.state == VersionState::Committed
                    && only.commit_ts.map_or(false, |ts| ts <= watermark)
            }
            _ => false,
        };

        Pruned {
            removed,
            removed_versions: before - versions.len(),
            dead,
        }
    }

    fn set_state(&self, id: VersionId, state: VersionState, commit_ts: Option<Timestamp>) -> bool {
        let mut versions = self.versions.write();
        match versions.iter_mut().find(|v| v.id == id) {
            Some(version) if version.state == VersionState::Pending => {
                version.state = state;
                version.commit_ts = commit_ts;
                true
            }
            _ => false,
        }
    }
}

impl<T: Clone> Default for VersionChain<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync> VersionHandle for VersionChain<T> {
    fn commit_version(&self, id: VersionId, commit_ts: Timestamp) -> bool {
        self.set_state(id, VersionState::Committed, Some(commit_ts))
    }

    fn abort_version(&self, id: VersionId) -> bool {
        self.set_state(id, VersionState::Aborted, None)
    }
}

/// Version ID generator.
#[derive(Debug)]
pub struct VersionIdGenerator {
    next_id: AtomicU64,
}

impl VersionIdGenerator {
    /// Creates a new generator.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }

    /// Generates the next version ID.
    pub fn next_id(&self) -> VersionId {
        VersionId::new(self.next_id.fetch_add(1, AtomicOrdering::Relaxed))
    }
}

impl Default for VersionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
