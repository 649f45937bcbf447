//! Transaction manager for coordinating transaction lifecycle.
//!
//! This module provides the core transaction management functionality:
//! - Transaction lifecycle (begin, commit, rollback)
//! - Snapshot selection per isolation level
//! - Integration with the WAL for durability
//! - Row lock acquisition and release
//! - Serializable validation at commit
//!
//! # Transaction States
//!
//! ```text
//! ┌───────┐    begin()    ┌────────┐
//! │ Start │──────────────▶│ Active │
//! └───────┘               └────────┘
//!                              │
//!                    ┌─────────┴─────────┐
//!                    │                   │
//!               commit()            rollback()
//!                    │             (or failed commit)
//!                    ▼                   ▼
//!             ┌───────────┐       ┌──────────┐
//!             │ Committed │       │ Aborted  │
//!             └───────────┘       └──────────┘
//! ```
//!
//! # Commit Protocol
//!
//! Commits are serialized by the commit latch:
//!
//! 1. validate serializable conflicts
//! 2. take the next commit timestamp and append the write batch plus a
//!    commit record to the WAL (synced)
//! 3. stamp every pending version with the timestamp
//! 4. publish the timestamp, making the commit visible to new snapshots
//!
//! A failure in 1 or 2 aborts the transaction; nothing it wrote is ever
//! visible to other transactions.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard, RwLock};
use tessera_common::{
    RowId, RowKey, TableId, Timestamp, TxnId, DEFAULT_LOCK_TIMEOUT_MS,
    MAX_CONCURRENT_TRANSACTIONS,
};
use tessera_mvcc::{
    CommitClock, ConflictError, ConflictTracker, IsolationLevel, ReadItem, Snapshot,
    VersionHandle, VersionId, Watermark,
};
use tessera_wal::{RowPayload, Wal, WalError, WalPayload};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::lock::{LockError, LockManager, LockManagerConfig, LockMode, LockStats, ResourceId};

/// The state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can perform operations.
    Active,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been aborted.
    Aborted,
}

impl TransactionState {
    /// Returns true if the transaction can perform operations.
    pub fn is_active(&self) -> bool {
        *self == TransactionState::Active
    }

    /// Returns true if the transaction has ended.
    pub fn is_ended(&self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionState::Active => write!(f, "Active"),
            TransactionState::Committed => write!(f, "Committed"),
            TransactionState::Aborted => write!(f, "Aborted"),
        }
    }
}

/// The kind of a row write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    /// A new row.
    Insert,
    /// A changed row.
    Update,
    /// A removed row.
    Delete,
}

/// A write operation recorded in the transaction.
///
/// Carries the encoded row images for the log and a handle on the version
/// chain so commit and rollback can resolve the pending version.
#[derive(Clone)]
pub struct WriteRecord {
    /// Table the row belongs to.
    pub table_id: TableId,
    /// Table name, as logged.
    pub table_name: String,
    /// Row written.
    pub row_id: RowId,
    /// Kind of write.
    pub kind: WriteKind,
    /// Encoded row before the write.
    pub before: Option<Bytes>,
    /// Encoded row after the write.
    pub after: Option<Bytes>,
    /// Chain holding the pending version.
    pub chain: Arc<dyn VersionHandle>,
    /// The pending version.
    pub version: VersionId,
}

impl WriteRecord {
    /// Returns the row key written.
    pub fn key(&self) -> RowKey {
        RowKey::new(self.table_id, self.row_id)
    }

    /// Builds the WAL payload for this write.
    pub fn to_payload(&self) -> WalPayload {
        let row = RowPayload {
            table: self.table_name.clone(),
            row_id: self.row_id,
            before: self.before.clone(),
            after: self.after.clone(),
        };
        match self.kind {
            WriteKind::Insert => WalPayload::Insert(row),
            WriteKind::Update => WalPayload::Update(row),
            WriteKind::Delete => WalPayload::Delete(row),
        }
    }
}

impl fmt::Debug for WriteRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteRecord")
            .field("table", &self.table_name)
            .field("row_id", &self.row_id)
            .field("kind", &self.kind)
            .field("version", &self.version)
            .finish()
    }
}

/// A transaction and its pending work.
struct Transaction {
    id: TxnId,
    state: TransactionState,
    isolation: IsolationLevel,
    /// Visible timestamp pinned at begin; holds back garbage collection.
    begin_ts: Timestamp,
    /// Fixed read point for repeatable read and serializable.
    snapshot_ts: Option<Timestamp>,
    commit_ts: Option<Timestamp>,
    writes: Vec<WriteRecord>,
    started_at: Instant,
}

impl Transaction {
    fn new(id: TxnId, isolation: IsolationLevel, begin_ts: Timestamp) -> Self {
        Self {
            id,
            state: TransactionState::Active,
            isolation,
            begin_ts,
            snapshot_ts: None,
            commit_ts: None,
            writes: Vec::new(),
            started_at: Instant::now(),
        }
    }

    fn ensure_active(&self) -> TxnResult<()> {
        if self.state.is_active() {
            Ok(())
        } else {
            Err(TransactionError::NotActive {
                txn_id: self.id,
                state: self.state,
            })
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("isolation", &self.isolation)
            .field("writes", &self.writes.len())
            .finish()
    }
}

/// Errors that can occur during transaction operations.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// No transaction with this id exists.
    #[error("unknown transaction {0}")]
    UnknownTransaction(TxnId),

    /// The transaction has already committed or aborted.
    #[error("transaction {txn_id} is not active ({state})")]
    NotActive {
        /// The transaction ID.
        txn_id: TxnId,
        /// The current state.
        state: TransactionState,
    },

    /// Lock acquisition failed; the transaction stays active.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// Serializable validation failed; the transaction was aborted.
    #[error("serialization failure: {0}")]
    SerializationFailure(#[from] ConflictError),

    /// The commit could not be made durable; the transaction was aborted.
    #[error("durability failure: {0}")]
    Durability(#[from] WalError),

    /// Too many transactions are running.
    #[error("too many concurrent transactions (limit {limit})")]
    TooManyTransactions {
        /// The configured limit.
        limit: usize,
    },
}

impl TransactionError {
    /// Returns true if the transaction was aborted by this error.
    pub fn aborts_transaction(&self) -> bool {
        matches!(
            self,
            TransactionError::SerializationFailure(_) | TransactionError::Durability(_)
        )
    }

    /// Returns true if retrying the operation or transaction may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransactionError::Lock(_)
                | TransactionError::SerializationFailure(_)
                | TransactionError::TooManyTransactions { .. }
        )
    }
}

/// Result type for transaction operations.
pub type TxnResult<T> = Result<T, TransactionError>;

/// Configuration for the transaction manager.
#[derive(Debug, Clone)]
pub struct TransactionManagerConfig {
    /// Default isolation level for new transactions.
    pub default_isolation: IsolationLevel,
    /// Lock timeout.
    pub lock_timeout: Duration,
    /// Whether to enable deadlock detection.
    pub deadlock_detection: bool,
    /// Maximum number of concurrently active transactions.
    pub max_active: usize,
}

impl TransactionManagerConfig {
    /// Creates a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default isolation level.
    #[must_use]
    pub fn with_default_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.default_isolation = isolation;
        self
    }

    /// Sets the lock timeout.
    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Enables or disables deadlock detection.
    #[must_use]
    pub fn with_deadlock_detection(mut self, enabled: bool) -> Self {
        self.deadlock_detection = enabled;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.lock_timeout.is_zero() {
            return Err("lock_timeout must be greater than zero".into());
        }
        if self.max_active == 0 {
            return Err("max_active must be greater than zero".into());
        }
        Ok(())
    }

    fn lock_config(&self) -> LockManagerConfig {
        LockManagerConfig {
            lock_timeout: self.lock_timeout,
            deadlock_detection: self.deadlock_detection,
        }
    }
}

impl Default for TransactionManagerConfig {
    fn default() -> Self {
        Self {
            default_isolation: IsolationLevel::default(),
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
            deadlock_detection: true,
            max_active: MAX_CONCURRENT_TRANSACTIONS,
        }
    }
}

/// Statistics about the transaction manager.
#[derive(Debug, Default)]
pub struct TransactionStats {
    /// Total transactions started.
    pub started: AtomicU64,
    /// Total transactions committed.
    pub committed: AtomicU64,
    /// Total transactions aborted.
    pub aborted: AtomicU64,
    /// Currently active transactions.
    pub active: AtomicU64,
    /// Commits refused by serializable validation.
    pub serialization_failures: AtomicU64,
    /// Commits refused because the WAL failed.
    pub durability_failures: AtomicU64,
}

impl TransactionStats {
    /// Creates new stats.
    pub fn new() -> Self {
        Self::default()
    }
}

/// The transaction manager coordinates all transaction operations.
pub struct TransactionManager {
    clock: Arc<CommitClock>,
    wal: Arc<Wal>,
    lock_manager: LockManager,
    conflicts: ConflictTracker,
    watermark: Watermark,
    /// Known transactions, active and finished-but-not-collected.
    transactions: RwLock<HashMap<TxnId, Arc<Mutex<Transaction>>>>,
    /// Serializes commits and checkpoints.
    commit_latch: Mutex<()>,
    config: TransactionManagerConfig,
    stats: TransactionStats,
    next_txn_id: AtomicU64,
    /// Lock owners for DDL, counting down from the top of the id range so
    /// they never meet a transaction id.
    next_ddl_owner: AtomicU64,
}

impl TransactionManager {
    /// Creates a transaction manager writing commits to `wal`.
    pub fn new(clock: Arc<CommitClock>, wal: Arc<Wal>, config: TransactionManagerConfig) -> Self {
        Self {
            clock,
            wal,
            lock_manager: LockManager::with_config(config.lock_config()),
            conflicts: ConflictTracker::new(),
            watermark: Watermark::new(),
            transactions: RwLock::new(HashMap::new()),
            commit_latch: Mutex::new(()),
            config,
            stats: TransactionStats::new(),
            next_txn_id: AtomicU64::new(TxnId::MIN.as_u64()),
            next_ddl_owner: AtomicU64::new(u64::MAX),
        }
    }

    /// Begins a new transaction with the default isolation level.
    pub fn begin(&self) -> TxnResult<TxnId> {
        self.begin_with_isolation(self.config.default_isolation)
    }

    /// Begins a new transaction with a specific isolation level.
    pub fn begin_with_isolation(&self, isolation: IsolationLevel) -> TxnResult<TxnId> {
        let active = self.stats.active.load(AtomicOrdering::Relaxed) as usize;
        if active >= self.config.max_active {
            return Err(TransactionError::TooManyTransactions {
                limit: self.config.max_active,
            });
        }

        let txn_id = self.allocate_id();
        let begin_ts = self.watermark.pin(&self.clock);
        if isolation.tracks_conflicts() {
            self.conflicts.register(txn_id);
        }

        self.transactions.write().insert(
            txn_id,
            Arc::new(Mutex::new(Transaction::new(txn_id, isolation, begin_ts))),
        );

        self.stats.started.fetch_add(1, AtomicOrdering::Relaxed);
        self.stats.active.fetch_add(1, AtomicOrdering::Relaxed);
        debug!(txn = txn_id.as_u64(), %isolation, begin_ts = begin_ts.as_u64(), "transaction begun");

        Ok(txn_id)
    }

    /// Returns the snapshot the transaction's next read uses.
    ///
    /// Read committed takes a fresh snapshot per call; repeatable read and
    /// serializable fix theirs at the first call.
    pub fn snapshot(&self, txn_id: TxnId) -> TxnResult<Snapshot> {
        let handle = self.get(txn_id)?;
        let mut txn = handle.lock();
        txn.ensure_active()?;

        Ok(match txn.isolation {
            IsolationLevel::ReadUncommitted => Snapshot::dirty(txn_id),
            IsolationLevel::ReadCommitted => Snapshot::committed(txn_id, self.clock.visible()),
            IsolationLevel::RepeatableRead | IsolationLevel::Serializable => {
                let read_ts = match txn.snapshot_ts {
                    Some(ts) => ts,
                    None => {
                        let ts = self.clock.visible();
                        txn.snapshot_ts = Some(ts);
                        self.conflicts.set_snapshot(txn_id, ts);
                        ts
                    }
                };
                Snapshot::committed(txn_id, read_ts)
            }
        })
    }

    /// Returns the transaction's isolation level.
    pub fn isolation(&self, txn_id: TxnId) -> TxnResult<IsolationLevel> {
        Ok(self.get(txn_id)?.lock().isolation)
    }

    /// Fails unless the transaction exists and is active.
    pub fn ensure_active(&self, txn_id: TxnId) -> TxnResult<()> {
        self.get(txn_id)?.lock().ensure_active()
    }

    /// Acquires the write lock on a row, waiting up to the lock timeout.
    ///
    /// The table is locked in intention-exclusive mode first. A timeout or
    /// deadlock leaves the transaction active with its other locks intact.
    pub fn lock_row(&self, txn_id: TxnId, key: RowKey) -> TxnResult<()> {
        self.ensure_active(txn_id)?;
        let timeout = Some(self.config.lock_timeout);
        self.lock_manager.lock(
            txn_id,
            ResourceId::table(key.table),
            LockMode::IntentionExclusive,
            timeout,
        )?;
        self.lock_manager
            .lock(txn_id, ResourceId::row(key), LockMode::Exclusive, timeout)?;
        Ok(())
    }

    /// Returns true if the transaction holds the write lock on a row.
    pub fn holds_row_lock(&self, txn_id: TxnId, key: RowKey) -> bool {
        self.lock_manager
            .holds(txn_id, &ResourceId::row(key), LockMode::Exclusive)
    }

    /// Runs `f` while holding an exclusive lock on a table.
    ///
    /// Waits for every transaction with writes on the table to finish. The
    /// lock is held by a one-off owner id outside the transaction id space.
    pub fn with_table_lock<R>(&self, table: TableId, f: impl FnOnce() -> R) -> TxnResult<R> {
        let owner = TxnId::new(self.next_ddl_owner.fetch_sub(1, AtomicOrdering::Relaxed));
        self.lock_manager.lock(
            owner,
            ResourceId::table(table),
            LockMode::Exclusive,
            Some(self.config.lock_timeout),
        )?;
        let result = f();
        self.lock_manager.release_all(owner);
        Ok(result)
    }

    /// Records a read for serializable validation.
    pub fn record_read(&self, txn_id: TxnId, item: ReadItem) {
        self.conflicts.record_read(txn_id, item);
    }

    /// Registers a write whose pending version has been installed.
    pub fn register_write(&self, txn_id: TxnId, write: WriteRecord) -> TxnResult<()> {
        let handle = self.get(txn_id)?;
        let mut txn = handle.lock();
        txn.ensure_active()?;
        self.conflicts.record_write(txn_id, write.key());
        txn.writes.push(write);
        Ok(())
    }

    /// Commits a transaction and returns its commit timestamp.
    ///
    /// Read-only transactions write nothing to the log and return the
    /// timestamp they read at.
    pub fn commit(&self, txn_id: TxnId) -> TxnResult<Timestamp> {
        let handle = self.get(txn_id)?;
        let mut txn = handle.lock();
        txn.ensure_active()?;

        let latch = self.commit_latch.lock();

        if let Err(conflict) = self.conflicts.validate(txn_id) {
            drop(latch);
            self.stats
                .serialization_failures
                .fetch_add(1, AtomicOrdering::Relaxed);
            warn!(txn = txn_id.as_u64(), %conflict, "serialization failure");
            self.abort_locked(&mut txn);
            return Err(conflict.into());
        }

        if txn.writes.is_empty() {
            let ts = self.clock.visible();
            self.conflicts.record_commit(txn_id, ts, &[]);
            drop(latch);
            self.finish(&mut txn, TransactionState::Committed, Some(ts));
            return Ok(ts);
        }

        let commit_ts = self.clock.next_commit();
        let payloads = txn.writes.iter().map(WriteRecord::to_payload).collect();
        if let Err(err) = self.wal.log_commit(txn_id, payloads, commit_ts) {
            drop(latch);
            self.stats
                .durability_failures
                .fetch_add(1, AtomicOrdering::Relaxed);
            error!(txn = txn_id.as_u64(), error = %err, "commit could not be made durable");
            self.abort_locked(&mut txn);
            return Err(err.into());
        }

        for write in &txn.writes {
            write.chain.commit_version(write.version, commit_ts);
        }
        self.clock.publish(commit_ts);

        let keys: Vec<RowKey> = txn.writes.iter().map(WriteRecord::key).collect();
        self.conflicts.record_commit(txn_id, commit_ts, &keys);
        drop(latch);

        debug!(
            txn = txn_id.as_u64(),
            commit_ts = commit_ts.as_u64(),
            writes = keys.len(),
            elapsed_us = txn.started_at.elapsed().as_micros() as u64,
            "transaction committed"
        );
        self.finish(&mut txn, TransactionState::Committed, Some(commit_ts));
        Ok(commit_ts)
    }

    /// Rolls back a transaction, discarding its pending writes.
    ///
    /// A no-op on a committed or aborted transaction, and on one that has
    /// already been collected.
    pub fn rollback(&self, txn_id: TxnId) -> TxnResult<()> {
        let handle = match self.get(txn_id) {
            Ok(handle) => handle,
            Err(_) if self.was_issued(txn_id) => return Ok(()),
            Err(err) => return Err(err),
        };
        let mut txn = handle.lock();
        if txn.state.is_ended() {
            return Ok(());
        }
        self.abort_locked(&mut txn);
        debug!(txn = txn_id.as_u64(), "transaction rolled back");
        Ok(())
    }

    /// Returns the state of a transaction.
    pub fn state(&self, txn_id: TxnId) -> TxnResult<TransactionState> {
        Ok(self.get(txn_id)?.lock().state)
    }

    /// Returns the commit timestamp of a committed transaction.
    pub fn commit_ts(&self, txn_id: TxnId) -> TxnResult<Option<Timestamp>> {
        Ok(self.get(txn_id)?.lock().commit_ts)
    }

    /// Holds off commits until the guard is dropped.
    pub fn pause_commits(&self) -> MutexGuard<'_, ()> {
        self.commit_latch.lock()
    }

    /// Returns the garbage collection watermark: no active transaction
    /// reads below it.
    pub fn gc_watermark(&self) -> Timestamp {
        self.watermark.watermark(&self.clock)
    }

    /// Forgets finished transactions and serializable history below
    /// `watermark`. Returns the number of transactions forgotten.
    pub fn collect(&self, watermark: Timestamp) -> usize {
        let mut transactions = self.transactions.write();
        let before = transactions.len();
        transactions.retain(|_, txn| txn.lock().state.is_active());
        let forgotten = before - transactions.len();
        drop(transactions);

        self.conflicts.prune_history(watermark);
        forgotten
    }

    /// Moves the id allocator and clock past recovered state.
    pub fn restore(&self, next_txn_id: TxnId, last_commit: Timestamp) {
        self.next_txn_id
            .fetch_max(next_txn_id.as_u64(), AtomicOrdering::SeqCst);
        self.clock.advance_to(last_commit);
    }

    /// Returns the id the next transaction will receive.
    pub fn next_txn_id(&self) -> TxnId {
        TxnId::new(self.next_txn_id.load(AtomicOrdering::SeqCst))
    }

    /// Returns the number of active transactions.
    pub fn active_count(&self) -> usize {
        self.stats.active.load(AtomicOrdering::Relaxed) as usize
    }

    /// Returns statistics.
    pub fn stats(&self) -> &TransactionStats {
        &self.stats
    }

    /// Returns lock manager statistics.
    pub fn lock_stats(&self) -> &LockStats {
        self.lock_manager.stats()
    }

    /// Returns the lock manager.
    pub fn lock_manager(&self) -> &LockManager {
        &self.lock_manager
    }

    /// Returns the commit clock.
    pub fn clock(&self) -> &Arc<CommitClock> {
        &self.clock
    }

    /// Returns the WAL.
    pub fn wal(&self) -> &Arc<Wal> {
        &self.wal
    }

    /// Returns the configuration.
    pub fn config(&self) -> &TransactionManagerConfig {
        &self.config
    }

    fn get(&self, txn_id: TxnId) -> TxnResult<Arc<Mutex<Transaction>>> {
        self.transactions
            .read()
            .get(&txn_id)
            .cloned()
            .ok_or(TransactionError::UnknownTransaction(txn_id))
    }

    fn allocate_id(&self) -> TxnId {
        TxnId::new(self.next_txn_id.fetch_add(1, AtomicOrdering::SeqCst))
    }

    fn was_issued(&self, txn_id: TxnId) -> bool {
        txn_id.is_valid() && txn_id < self.next_txn_id()
    }

    fn abort_locked(&self, txn: &mut Transaction) {
        for write in txn.writes.iter().rev() {
            write.chain.abort_version(write.version);
        }
        self.conflicts.forget(txn.id);
        self.finish(txn, TransactionState::Aborted, None);
    }

    fn finish(&self, txn: &mut Transaction, state: TransactionState, commit_ts: Option<Timestamp>) {
        txn.state = state;
        txn.commit_ts = commit_ts;
        txn.writes.clear();
        self.lock_manager.release_all(txn.id);
        self.watermark.unpin(txn.begin_ts);

        let counter = match state {
            TransactionState::Committed => &self.stats.committed,
            _ => &self.stats.aborted,
        };
        counter.fetch_add(1, AtomicOrdering::Relaxed);
        self.stats.active.fetch_sub(1, AtomicOrdering::Relaxed);
    }
}

impl fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionManager")
            .field("active_count", &self.active_count())
            .field("lock_count", &self.lock_manager.lock_count())
            .field("visible", &self.clock.visible())
            .finish()
    }
}
