//! Snapshots, isolation levels and serializable conflict tracking.
//!
//! # Isolation Levels
//!
//! - **Read uncommitted**: reads see the newest non-aborted version of a row,
//!   including other transactions' pending writes.
//! - **Read committed**: every read takes a fresh snapshot of committed state.
//! - **Repeatable read**: one snapshot, fixed at the transaction's first
//!   operation.
//! - **Serializable**: repeatable read plus backward validation at commit.
//!
//! # Read Visibility Rules
//!
//! A version V is visible in snapshot S if:
//! 1. V was written by S's own transaction and not aborted, OR
//! 2. V is committed with `commit_ts <= S.read_ts`
//!
//! A dirty snapshot (no read timestamp) sees any non-aborted version.
//!
//! # Serializable Validation
//!
//! ```text
//!  T1  ──snapshot(5)──── read r1 ──── write r2 ─────────── commit? ──▶
//!  T2          ──────── write r1 ── commit(ts 7) ──▶
//!                                        │
//!                   history: {ts 7, T2, rows {r1}}
//!
//!  T1 validation: 7 > 5 and r1 ∈ T1.reads  ⇒  ReadWrite conflict
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tessera_common::{RowKey, TableId, Timestamp, TxnId};
use thiserror::Error;

/// Isolation level for a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Dirty reads of uncommitted writes.
    ReadUncommitted,
    /// Sees committed data as of each read.
    ReadCommitted,
    /// Sees committed data as of the first operation.
    RepeatableRead,
    /// Repeatable read with commit-time conflict detection.
    Serializable,
}

impl IsolationLevel {
    /// Returns true if the snapshot is fixed for the whole transaction.
    pub fn fixes_snapshot(self) -> bool {
        matches!(self, Self::RepeatableRead | Self::Serializable)
    }

    /// Returns true if reads and writes are tracked for validation.
    pub fn tracks_conflicts(self) -> bool {
        self == Self::Serializable
    }
}

impl Default for IsolationLevel {
    fn default() -> Self {
        Self::RepeatableRead
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        };
        f.write_str(name)
    }
}

/// A consistent view of the database for one read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    /// Transaction that owns this snapshot.
    txn_id: TxnId,
    /// Commit timestamp bound; `None` reads uncommitted data.
    read_ts: Option<Timestamp>,
}

impl Snapshot {
    /// Creates a snapshot of committed state as of `read_ts`.
    pub fn committed(txn_id: TxnId, read_ts: Timestamp) -> Self {
        Self {
            txn_id,
            read_ts: Some(read_ts),
        }
    }

    /// Creates a snapshot that sees uncommitted writes.
    pub fn dirty(txn_id: TxnId) -> Self {
        Self {
            txn_id,
            read_ts: None,
        }
    }

    /// Creates a snapshot with no owning transaction.
    pub fn at_timestamp(read_ts: Timestamp) -> Self {
        Self::committed(TxnId::INVALID, read_ts)
    }

    /// Returns the transaction ID.
    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    /// Returns the read timestamp, if any.
    pub fn read_ts(&self) -> Option<Timestamp> {
        self.read_ts
    }

    /// Returns true if this snapshot reads uncommitted data.
    pub fn is_dirty(&self) -> bool {
        self.read_ts.is_none()
    }
}

/// Something a serializable transaction read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadItem {
    /// A single row, read by id.
    Row(RowKey),
    /// A whole table, read by a scan.
    Table(TableId),
}

/// A serializable conflict detected at commit.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConflictError {
    /// A later committed transaction wrote something this one read.
    #[error("transaction {txn} read data later written by transaction {committed_by}")]
    ReadWrite {
        /// Transaction being validated.
        txn: TxnId,
        /// Transaction that committed the conflicting write.
        committed_by: TxnId,
    },

    /// A later committed transaction wrote a row this one also wrote.
    #[error("transaction {txn} wrote row {row} also written by transaction {committed_by}")]
    WriteWrite {
        /// Transaction being validated.
        txn: TxnId,
        /// The contested row.
        row: RowKey,
        /// Transaction that committed the conflicting write.
        committed_by: TxnId,
    },
}

#[derive(Debug, Default)]
struct Footprint {
    snapshot_ts: Option<Timestamp>,
    read_rows: HashSet<RowKey>,
    read_tables: HashSet<TableId>,
    written: HashSet<RowKey>,
}

#[derive(Debug)]
struct CommittedWrites {
    commit_ts: Timestamp,
    txn_id: TxnId,
    rows: HashSet<RowKey>,
    tables: HashSet<TableId>,
}

#[derive(Debug, Default)]
struct TrackerState {
    active: HashMap<TxnId, Footprint>,
    history: VecDeque<CommittedWrites>,
}

/// Tracks serializable transactions' reads and writes, plus the writes of
/// every transaction that committed while one of them was running.
#[derive(Debug, Default)]
pub struct ConflictTracker {
    state: Mutex<TrackerState>,
}

impl ConflictTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking a serializable transaction.
    pub fn register(&self, txn_id: TxnId) {
        self.state.lock().active.entry(txn_id).or_default();
    }

    /// Returns true if `txn_id` is being tracked.
    pub fn is_tracked(&self, txn_id: TxnId) -> bool {
        self.state.lock().active.contains_key(&txn_id)
    }

    /// Records the snapshot a tracked transaction reads at.
    pub fn set_snapshot(&self, txn_id: TxnId, snapshot_ts: Timestamp) {
        if let Some(footprint) = self.state.lock().active.get_mut(&txn_id) {
            footprint.snapshot_ts.get_or_insert(snapshot_ts);
        }
    }

    /// Records a read by a tracked transaction.
    pub fn record_read(&self, txn_id: TxnId, item: ReadItem) {
        if let Some(footprint) = self.state.lock().active.get_mut(&txn_id) {
            match item {
                ReadItem::Row(key) => {
                    footprint.read_rows.insert(key);
                }
                ReadItem::Table(table) => {
                    footprint.read_tables.insert(table);
                }
            }
        }
    }

    /// Records a write by a tracked transaction.
    pub fn record_write(&self, txn_id: TxnId, key: RowKey) {
        if let Some(footprint) = self.state.lock().active.get_mut(&txn_id) {
            footprint.written.insert(key);
        }
    }

    /// Validates a tracked transaction against everything committed after
    /// its snapshot. Untracked transactions always pass.
    pub fn validate(&self, txn_id: TxnId) -> Result<(), ConflictError> {
        let state = self.state.lock();
        let Some(footprint) = state.active.get(&txn_id) else {
            return Ok(());
        };
        let Some(snapshot_ts) = footprint.snapshot_ts else {
            return Ok(());
        };

        for committed in state
            .history
            .iter()
            .filter(|c| c.commit_ts > snapshot_ts && c.txn_id != txn_id)
        {
            if let Some(row) = committed.rows.iter().find(|r| footprint.written.contains(r)) {
                return Err(ConflictError::WriteWrite {
                    txn: txn_id,
                    row: *row,
                    committed_by: committed.txn_id,
                });
            }
            let read_row = committed.rows.iter().any(|r| footprint.read_rows.contains(r));
            let read_table = committed
                .tables
                .iter()
                .any(|t| footprint.read_tables.contains(t));
            if read_row || read_table {
                return Err(ConflictError::ReadWrite {
                    txn: txn_id,
                    committed_by: committed.txn_id,
                });
            }
        }
        Ok(())
    }

    /// Records a commit. Any transaction's writes are kept while a tracked
    /// transaction could still conflict with them.
    pub fn record_commit(&self, txn_id: TxnId, commit_ts: Timestamp, rows: &[RowKey]) {
        let mut state = self.state.lock();
        state.active.remove(&txn_id);
        if state.active.is_empty() {
            state.history.clear();
            return;
        }
        if rows.is_empty() {
            return;
        }
        let rows: HashSet<RowKey> = rows.iter().copied().collect();
        let tables = rows.iter().map(|r| r.table).collect();
        state.history.push_back(CommittedWrites {
            commit_ts,
            txn_id,
            rows,
            tables,
        });
    }

    /// Stops tracking a transaction without recording writes.
    pub fn forget(&self, txn_id: TxnId) {
        let mut state = self.state.lock();
        state.active.remove(&txn_id);
        if state.active.is_empty() {
            state.history.clear();
        }
    }

    /// Drops history no tracked snapshot can conflict with.
    pub fn prune_history(&self, watermark: Timestamp) -> usize {
        let mut state = self.state.lock();
        let floor = state
            .active
            .values()
            .filter_map(|f| f.snapshot_ts)
            .min()
            .map_or(watermark, |ts| ts.min(watermark));
        let before = state.history.len();
        state.history.retain(|c| c.commit_ts > floor);
        before - state.history.len()
    }

    /// Returns the number of commits held in history.
    pub fn history_len(&self) -> usize {
        self.state.lock().history.len()
    }
}
