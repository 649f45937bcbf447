//! Lock management for concurrent writers.
//!
//! This module implements a two-level lock manager:
//! - Exclusive (X) row locks, taken by every write at every isolation level
//! - Intention-exclusive (IX) table locks, taken before any row lock
//! - Exclusive table locks, taken by DDL that removes a table
//!
//! Readers never lock; they rely on snapshots.
//!
//! # Lock Compatibility Matrix
//!
//! ```text
//!          │ IX │ X  │
//! ─────────┼────┼────┤
//!     IX   │ ✓  │ ✗  │
//!     X    │ ✗  │ ✗  │
//! ```
//!
//! # Waiting
//!
//! A blocked request records wait-for edges to every incompatible holder. If
//! the new edges close a cycle the request fails at once with
//! [`LockError::Deadlock`]; otherwise it sleeps on a condition variable until
//! a release or its deadline. Neither failure releases the locks the
//! transaction already holds.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tessera_common::{RowKey, TableId, TxnId, DEFAULT_LOCK_TIMEOUT_MS};
use thiserror::Error;
use tracing::warn;

/// Lock mode for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Intention exclusive (table-level hint for row X locks).
    IntentionExclusive,
    /// Exclusive lock (write lock).
    Exclusive,
}

impl LockMode {
    /// Checks if this lock mode is compatible with another.
    pub fn is_compatible_with(&self, other: &LockMode) -> bool {
        matches!(
            (self, other),
            (LockMode::IntentionExclusive, LockMode::IntentionExclusive)
        )
    }

    /// Returns true if holding `self` implies holding `other`.
    pub fn covers(&self, other: &LockMode) -> bool {
        *self == LockMode::Exclusive || self == other
    }

    /// Returns the stronger of two lock modes.
    pub fn stronger(self, other: LockMode) -> LockMode {
        if self == LockMode::Exclusive || other == LockMode::Exclusive {
            LockMode::Exclusive
        } else {
            LockMode::IntentionExclusive
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::IntentionExclusive => write!(f, "IX"),
            LockMode::Exclusive => write!(f, "X"),
        }
    }
}

/// The type of resource being locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceId {
    /// A table-level lock.
    Table(TableId),
    /// A row-level lock.
    Row(RowKey),
}

impl ResourceId {
    /// Creates a table resource ID.
    pub fn table(table_id: TableId) -> Self {
        ResourceId::Table(table_id)
    }

    /// Creates a row resource ID.
    pub fn row(key: RowKey) -> Self {
        ResourceId::Row(key)
    }

    /// Returns the table ID for this resource.
    pub fn table_id(&self) -> TableId {
        match self {
            ResourceId::Table(id) => *id,
            ResourceId::Row(key) => key.table,
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceId::Table(id) => write!(f, "Table({})", id),
            ResourceId::Row(key) => write!(f, "Row({})", key),
        }
    }
}

/// How a successful lock request was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockGrant {
    /// Lock was granted.
    Granted,
    /// Lock was upgraded from a weaker mode.
    Upgraded,
    /// Transaction already holds the lock.
    AlreadyHeld,
}

/// Reasons a lock request fails.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LockError {
    /// The request waited for the full timeout.
    #[error("transaction {txn_id} timed out after {waited_ms}ms waiting for {resource}")]
    Timeout {
        /// The waiting transaction.
        txn_id: TxnId,
        /// The contested resource.
        resource: ResourceId,
        /// How long the request waited.
        waited_ms: u64,
    },

    /// Waiting would close a cycle in the wait-for graph.
    #[error("deadlock: transaction {txn_id} waiting for {resource} closes a cycle through {cycle:?}")]
    Deadlock {
        /// The transaction whose request was refused.
        txn_id: TxnId,
        /// The contested resource.
        resource: ResourceId,
        /// Transactions on the cycle, starting with the waiter.
        cycle: Vec<TxnId>,
    },
}

impl LockError {
    /// Returns the transaction whose request failed.
    pub fn txn_id(&self) -> TxnId {
        match self {
            LockError::Timeout { txn_id, .. } | LockError::Deadlock { txn_id, .. } => *txn_id,
        }
    }

    /// Returns true for a deadlock refusal.
    pub fn is_deadlock(&self) -> bool {
        matches!(self, LockError::Deadlock { .. })
    }
}

/// Result type for lock operations.
pub type LockResult<T> = Result<T, LockError>;

/// Statistics about the lock manager.
#[derive(Debug, Default)]
pub struct LockStats {
    /// Total lock acquisitions.
    pub acquisitions: AtomicU64,
    /// Total lock releases.
    pub releases: AtomicU64,
    /// Total requests that had to wait.
    pub waits: AtomicU64,
    /// Total deadlocks detected.
    pub deadlocks: AtomicU64,
    /// Total lock upgrades.
    pub upgrades: AtomicU64,
    /// Total timeouts.
    pub timeouts: AtomicU64,
}

impl LockStats {
    /// Creates new stats.
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, AtomicOrdering::Relaxed);
    }
}

/// Configuration for the lock manager.
#[derive(Debug, Clone)]
pub struct LockManagerConfig {
    /// Default lock timeout.
    pub lock_timeout: Duration,
    /// Whether to check the wait-for graph before waiting.
    pub deadlock_detection: bool,
}

impl Default for LockManagerConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
            deadlock_detection: true,
        }
    }
}

/// Holders of a single resource.
#[derive(Debug, Default)]
struct LockInfo {
    holders: HashMap<TxnId, LockMode>,
}

impl LockInfo {
    /// Returns the holders that block `txn_id` from taking `mode`.
    fn blockers(&self, txn_id: TxnId, mode: LockMode) -> HashSet<TxnId> {
        self.holders
            .iter()
            .filter(|(holder, held)| **holder != txn_id && !mode.is_compatible_with(held))
            .map(|(holder, _)| *holder)
            .collect()
    }
}

#[derive(Debug, Default)]
struct LockTable {
    locks: HashMap<ResourceId, LockInfo>,
    txn_locks: HashMap<TxnId, HashSet<ResourceId>>,
    /// Wait-for graph edges (waiter -> holders).
    wait_for: HashMap<TxnId, HashSet<TxnId>>,
}

impl LockTable {
    fn try_grant(
        &mut self,
        txn_id: TxnId,
        resource: ResourceId,
        mode: LockMode,
    ) -> Result<LockGrant, HashSet<TxnId>> {
        let info = self.locks.entry(resource).or_default();
        let held = info.holders.get(&txn_id).copied();
        if held.map_or(false, |h| h.covers(&mode)) {
            return Ok(LockGrant::AlreadyHeld);
        }

        let blockers = info.blockers(txn_id, mode);
        if !blockers.is_empty() {
            return Err(blockers);
        }

        let granted = held.map_or(mode, |h| h.stronger(mode));
        info.holders.insert(txn_id, granted);
        self.txn_locks.entry(txn_id).or_default().insert(resource);
        Ok(if held.is_some() {
            LockGrant::Upgraded
        } else {
            LockGrant::Granted
        })
    }

    /// Returns the cycle through `start` in the wait-for graph, if any.
    fn find_cycle(&self, start: TxnId) -> Option<Vec<TxnId>> {
        let mut visited = HashSet::new();
        let mut stack = vec![(start, vec![start])];

        while let Some((txn, path)) = stack.pop() {
            let Some(holders) = self.wait_for.get(&txn) else {
                continue;
            };
            for holder in holders {
                if *holder == start {
                    return Some(path);
                }
                if visited.insert(*holder) {
                    let mut next = path.clone();
                    next.push(*holder);
                    stack.push((*holder, next));
                }
            }
        }
        None
    }

    fn cleanup(&mut self, resource: &ResourceId) {
        if self
            .locks
            .get(resource)
            .map_or(false, |info| info.holders.is_empty())
        {
            self.locks.remove(resource);
        }
    }
}

/// The lock manager for managing transaction locks.
pub struct LockManager {
    table: Mutex<LockTable>,
    /// Signalled whenever a lock is released.
    released: Condvar,
    config: LockManagerConfig,
    stats: LockStats,
}

impl LockManager {
    /// Creates a new lock manager with default configuration.
    pub fn new() -> Self {
        Self::with_config(LockManagerConfig::default())
    }

    /// Creates a lock manager with custom configuration.
    pub fn with_config(config: LockManagerConfig) -> Self {
        Self {
            table: Mutex::new(LockTable::default()),
            released: Condvar::new(),
            config,
            stats: LockStats::new(),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &LockManagerConfig {
        &self.config
    }

    /// Tries to acquire a lock without waiting. Returns `None` if the lock
    /// is held incompatibly by another transaction.
    pub fn try_lock(&self, txn_id: TxnId, resource: ResourceId, mode: LockMode) -> Option<LockGrant> {
        let mut table = self.table.lock();
        match table.try_grant(txn_id, resource, mode) {
            Ok(grant) => {
                self.record_grant(grant);
                Some(grant)
            }
            Err(_) => {
                table.cleanup(&resource);
                None
            }
        }
    }

    /// Acquires a lock, blocking until granted, deadlocked or timed out.
    pub fn lock(
        &self,
        txn_id: TxnId,
        resource: ResourceId,
        mode: LockMode,
        timeout: Option<Duration>,
    ) -> LockResult<LockGrant> {
        let start = Instant::now();
        let deadline = start + timeout.unwrap_or(self.config.lock_timeout);
        let mut table = self.table.lock();
        let mut waited = false;

        loop {
            let blockers = match table.try_grant(txn_id, resource, mode) {
                Ok(grant) => {
                    table.wait_for.remove(&txn_id);
                    self.record_grant(grant);
                    return Ok(grant);
                }
                Err(blockers) => blockers,
            };

            table.wait_for.insert(txn_id, blockers);

            if self.config.deadlock_detection {
                if let Some(cycle) = table.find_cycle(txn_id) {
                    table.wait_for.remove(&txn_id);
                    table.cleanup(&resource);
                    LockStats::bump(&self.stats.deadlocks);
                    warn!(txn = txn_id.as_u64(), %resource, ?cycle, "deadlock detected");
                    return Err(LockError::Deadlock {
                        txn_id,
                        resource,
                        cycle,
                    });
                }
            }

            if !waited {
                waited = true;
                LockStats::bump(&self.stats.waits);
            }

            if Instant::now() >= deadline
                || self.released.wait_until(&mut table, deadline).timed_out()
            {
                // One last attempt: a release may have raced the deadline
                if let Ok(grant) = table.try_grant(txn_id, resource, mode) {
                    table.wait_for.remove(&txn_id);
                    self.record_grant(grant);
                    return Ok(grant);
                }
                table.wait_for.remove(&txn_id);
                table.cleanup(&resource);
                LockStats::bump(&self.stats.timeouts);
                return Err(LockError::Timeout {
                    txn_id,
                    resource,
                    waited_ms: start.elapsed().as_millis() as u64,
                });
            }
        }
    }

    /// Returns true if `txn_id` holds `resource` in `mode` or stronger.
    pub fn holds(&self, txn_id: TxnId, resource: &ResourceId, mode: LockMode) -> bool {
        self.table
            .lock()
            .locks
            .get(resource)
            .and_then(|info| info.holders.get(&txn_id))
            .map_or(false, |held| held.covers(&mode))
    }

    /// Releases a lock.
    pub fn unlock(&self, txn_id: TxnId, resource: &ResourceId) -> bool {
        let mut table = self.table.lock();
        let released = table
            .locks
            .get_mut(resource)
            .map_or(false, |info| info.holders.remove(&txn_id).is_some());
        if released {
            if let Some(resources) = table.txn_locks.get_mut(&txn_id) {
                resources.remove(resource);
            }
            table.cleanup(resource);
            LockStats::bump(&self.stats.releases);
            self.released.notify_all();
        }
        released
    }

    /// Releases all locks held by a transaction.
    pub fn release_all(&self, txn_id: TxnId) -> usize {
        let mut table = self.table.lock();
        let resources = table.txn_locks.remove(&txn_id).unwrap_or_default();
        for resource in &resources {
            if let Some(info) = table.locks.get_mut(resource) {
                info.holders.remove(&txn_id);
            }
            table.cleanup(resource);
        }
        table.wait_for.remove(&txn_id);

        let count = resources.len();
        if count > 0 {
            self.stats
                .releases
                .fetch_add(count as u64, AtomicOrdering::Relaxed);
            self.released.notify_all();
        }
        count
    }

    fn record_grant(&self, grant: LockGrant) {
        match grant {
            LockGrant::Granted => LockStats::bump(&self.stats.acquisitions),
            LockGrant::Upgraded => LockStats::bump(&self.stats.upgrades),
            LockGrant::AlreadyHeld => {}
        }
    }

    /// Returns statistics about the lock manager.
    pub fn stats(&self) -> &LockStats {
        &self.stats
    }

    /// Returns the number of locked resources.
    pub fn lock_count(&self) -> usize {
        self.table.lock().locks.len()
    }

    /// Returns the number of transactions holding locks.
    pub fn txn_count(&self) -> usize {
        self.table.lock().txn_locks.len()
    }

    /// Returns the locks held by a transaction.
    pub fn get_txn_locks(&self, txn_id: TxnId) -> Vec<ResourceId> {
        self.table
            .lock()
            .txn_locks
            .get(&txn_id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockManager")
            .field("lock_count", &self.lock_count())
            .field("txn_count", &self.txn_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use tessera_common::RowId;

    fn row(table: u64, row: u64) -> ResourceId {
        ResourceId::row(RowKey::new(TableId::new(table), RowId::new(row)))
    }

    fn short() -> Option<Duration> {
        Some(Duration::from_millis(50))
    }

    #[test]
    fn test_lock_mode_compatibility() {
        use LockMode::*;

        assert!(IntentionExclusive.is_compatible_with(&IntentionExclusive));
        assert!(!IntentionExclusive.is_compatible_with(&Exclusive));
        assert!(!Exclusive.is_compatible_with(&IntentionExclusive));
        assert!(!Exclusive.is_compatible_with(&Exclusive));

        assert!(Exclusive.covers(&IntentionExclusive));
        assert!(!IntentionExclusive.covers(&Exclusive));
    }

    #[test]
    fn test_lock_manager_basic() {
        let lm = LockManager::new();
        let txn1 = TxnId::new(1);
        let resource = row(1, 1);

        assert_eq!(lm.try_lock(txn1, resource, LockMode::Exclusive), Some(LockGrant::Granted));
        assert_eq!(
            lm.try_lock(txn1, resource, LockMode::Exclusive),
            Some(LockGrant::AlreadyHeld)
        );
        assert!(lm.holds(txn1, &resource, LockMode::Exclusive));

        assert!(lm.unlock(txn1, &resource));
        assert!(!lm.holds(txn1, &resource, LockMode::Exclusive));
        assert_eq!(lm.lock_count(), 0);
    }

    #[test]
    fn test_intention_locks_share_table() {
        let lm = LockManager::new();
        let table = ResourceId::table(TableId::new(1));

        assert!(lm.try_lock(TxnId::new(1), table, LockMode::IntentionExclusive).is_some());
        assert!(lm.try_lock(TxnId::new(2), table, LockMode::IntentionExclusive).is_some());
        assert!(lm.try_lock(TxnId::new(3), table, LockMode::Exclusive).is_none());
        assert_eq!(lm.lock_count(), 1);
    }

    #[test]
    fn test_lock_upgrade() {
        let lm = LockManager::new();
        let txn1 = TxnId::new(1);
        let table = ResourceId::table(TableId::new(1));

        lm.try_lock(txn1, table, LockMode::IntentionExclusive);
        assert_eq!(lm.try_lock(txn1, table, LockMode::Exclusive), Some(LockGrant::Upgraded));
        assert!(lm.holds(txn1, &table, LockMode::IntentionExclusive));
    }

    #[test]
    fn test_timeout_keeps_other_locks() {
        let lm = LockManager::new();
        let txn1 = TxnId::new(1);
        let txn2 = TxnId::new(2);

        lm.lock(txn1, row(1, 1), LockMode::Exclusive, None).unwrap();
        lm.lock(txn2, row(1, 2), LockMode::Exclusive, None).unwrap();

        let err = lm.lock(txn2, row(1, 1), LockMode::Exclusive, short()).unwrap_err();
        assert!(matches!(err, LockError::Timeout { .. }));
        assert!(lm.holds(txn2, &row(1, 2), LockMode::Exclusive));
        assert_eq!(lm.stats().timeouts.load(AtomicOrdering::Relaxed), 1);
    }

    #[test]
    fn test_waiter_granted_after_release() {
        let lm = Arc::new(LockManager::new());
        let txn1 = TxnId::new(1);
        lm.lock(txn1, row(1, 1), LockMode::Exclusive, None).unwrap();

        let waiter = {
            let lm = Arc::clone(&lm);
            thread::spawn(move || {
                lm.lock(TxnId::new(2), row(1, 1), LockMode::Exclusive, Some(Duration::from_secs(5)))
            })
        };

        thread::sleep(Duration::from_millis(20));
        lm.release_all(txn1);
        assert_eq!(waiter.join().unwrap(), Ok(LockGrant::Granted));
        assert!(lm.holds(TxnId::new(2), &row(1, 1), LockMode::Exclusive));
    }

    #[test]
    fn test_deadlock_detected() {
        let lm = Arc::new(LockManager::new());
        let txn1 = TxnId::new(1);
        let txn2 = TxnId::new(2);
        lm.lock(txn1, row(1, 1), LockMode::Exclusive, None).unwrap();
        lm.lock(txn2, row(1, 2), LockMode::Exclusive, None).unwrap();

        // txn1 waits for row 2
        let blocked = {
            let lm = Arc::clone(&lm);
            thread::spawn(move || lm.lock(txn1, row(1, 2), LockMode::Exclusive, Some(Duration::from_secs(5))))
        };
        thread::sleep(Duration::from_millis(50));

        // txn2 asking for row 1 closes the cycle
        let err = lm.lock(txn2, row(1, 1), LockMode::Exclusive, None).unwrap_err();
        assert!(err.is_deadlock());
        assert_eq!(err.txn_id(), txn2);

        // txn2 still holds row 2 until it gives up
        assert!(lm.holds(txn2, &row(1, 2), LockMode::Exclusive));
        lm.release_all(txn2);
        assert_eq!(blocked.join().unwrap(), Ok(LockGrant::Granted));
        assert_eq!(lm.stats().deadlocks.load(AtomicOrdering::Relaxed), 1);
    }

    #[test]
    fn test_release_all() {
        let lm = LockManager::new();
        let txn1 = TxnId::new(1);

        lm.try_lock(txn1, ResourceId::table(TableId::new(1)), LockMode::IntentionExclusive);
        lm.try_lock(txn1, row(1, 1), LockMode::Exclusive);
        lm.try_lock(txn1, row(1, 2), LockMode::Exclusive);

        assert_eq!(lm.get_txn_locks(txn1).len(), 3);
        assert_eq!(lm.release_all(txn1), 3);
        assert_eq!(lm.get_txn_locks(txn1).len(), 0);
        assert_eq!(lm.lock_count(), 0);
    }

    #[test]
    fn test_resource_id() {
        assert_eq!(ResourceId::table(TableId::new(42)).table_id(), TableId::new(42));
        assert_eq!(row(42, 7).table_id(), TableId::new(42));
        assert_eq!(format!("{}", row(42, 7)), "Row(42:7)");
    }

    #[test]
    fn test_lock_mode_display() {
        assert_eq!(format!("{}", LockMode::Exclusive), "X");
        assert_eq!(format!("{}", LockMode::IntentionExclusive), "IX");
    }
}
