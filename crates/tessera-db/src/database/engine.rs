//! Main database engine.
//!
//! The `Database` struct is the top-level entry point for Tessera. It owns
//! the log, the transaction manager and the storage engine, and routes
//! every call to them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, error, info};

use tessera_common::{Lsn, RowId, Timestamp, TxnId};
use tessera_mvcc::{CommitClock, IsolationLevel};
use tessera_sql::executor::{JoinKind, JoinPredicate, Predicate, RowStream, TableRef, Value};
use tessera_sql::storage::{Catalog, GcReport, StorageEngine, TableInfo, TableSchema};
use tessera_txn::{TransactionManager, TransactionState};
use tessera_wal::{
    CreateTablePayload, DropTablePayload, FileLogStorage, LogStorage, MemoryLogStorage, Wal,
};

use super::checkpoint;
use super::error::{DatabaseError, DatabaseResult};
use super::recovery::{self, RecoveryStats};
use crate::config::EngineConfig;

/// Database statistics.
#[derive(Debug, Clone, Default)]
pub struct DatabaseStats {
    /// Number of tables.
    pub tables: usize,
    /// Row chains across all tables, including deleted rows awaiting GC.
    pub row_chains: usize,
    /// Currently active transactions.
    pub active_transactions: usize,
    /// Transactions started.
    pub transactions_started: u64,
    /// Transactions committed.
    pub transactions_committed: u64,
    /// Transactions aborted, by rollback or by a failed commit.
    pub transactions_aborted: u64,
    /// Commits refused by serializable validation.
    pub serialization_failures: u64,
    /// Commits refused because the log failed.
    pub durability_failures: u64,
    /// Lock requests that had to wait.
    pub lock_waits: u64,
    /// Deadlocks detected.
    pub deadlocks: u64,
    /// Lock waits that timed out.
    pub lock_timeouts: u64,
    /// Bytes appended to the log.
    pub wal_bytes: u64,
    /// Checkpoints written.
    pub checkpoints: u64,
    /// Garbage collection runs.
    pub gc_runs: u64,
    /// Whether the log refuses writes until `resume_durability`.
    pub durability_halted: bool,
    /// Time since open.
    pub uptime: Duration,
}

/// The main database engine.
pub struct Database {
    /// Configuration.
    config: EngineConfig,
    /// Write-ahead log.
    wal: Arc<Wal>,
    /// Transaction manager.
    tm: Arc<TransactionManager>,
    /// Storage engine.
    storage: StorageEngine,
    /// Serializes DDL with checkpoints.
    ddl_latch: Mutex<()>,
    /// Commits since the last checkpoint.
    commits_since_checkpoint: AtomicU64,
    /// Result of the last recovery run.
    recovery: Mutex<RecoveryStats>,
    /// When the database was opened.
    started_at: Instant,
}

impl Database {
    /// Opens a database with the given configuration, recovering any state
    /// its log holds.
    pub fn open(config: EngineConfig) -> DatabaseResult<Self> {
        config.validate()?;
        let log: Arc<dyn LogStorage> = match config.wal_path() {
            Some(path) => Arc::new(FileLogStorage::open(&path)?),
            None => Arc::new(MemoryLogStorage::new()),
        };
        Self::with_log_storage(config, log)
    }

    /// Opens an in-memory database.
    pub fn open_memory() -> DatabaseResult<Self> {
        Self::open(EngineConfig::default())
    }

    /// Opens a database on an explicit log, recovering any state it holds.
    /// `config.data_dir` is ignored.
    pub fn with_log_storage(config: EngineConfig, log: Arc<dyn LogStorage>) -> DatabaseResult<Self> {
        config.validate()?;
        let wal = Arc::new(Wal::open(config.wal_config(), log)?);
        let tm = Arc::new(TransactionManager::new(
            Arc::new(CommitClock::default()),
            Arc::clone(&wal),
            config.transaction_config(),
        ));
        let storage = StorageEngine::new(Arc::new(Catalog::new()), Arc::clone(&tm));

        let db = Self {
            config,
            wal,
            tm,
            storage,
            ddl_latch: Mutex::new(()),
            commits_since_checkpoint: AtomicU64::new(0),
            recovery: Mutex::new(RecoveryStats::default()),
            started_at: Instant::now(),
        };
        db.recover()?;

        info!(
            data_dir = ?db.config.data_dir,
            isolation = %db.config.default_isolation,
            "database opened"
        );
        Ok(db)
    }

    /// Returns the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the storage engine.
    pub fn storage(&self) -> &StorageEngine {
        &self.storage
    }

    /// Returns the transaction manager.
    pub fn transaction_manager(&self) -> &Arc<TransactionManager> {
        &self.tm
    }

    /// Returns the write-ahead log.
    pub fn wal(&self) -> &Arc<Wal> {
        &self.wal
    }

    // =========================================================================
    // DDL
    // =========================================================================

    /// Defines a table.
    pub fn define_table(&self, schema: TableSchema) -> DatabaseResult<Arc<TableInfo>> {
        let _ddl = self.ddl_latch.lock();
        let info = self.storage.create_table_with(schema, |info| {
            let definition = info.schema.to_json()?;
            self.wal.log_create_table(CreateTablePayload {
                table: info.name().to_string(),
                definition: Bytes::from(definition),
            })?;
            Ok::<(), DatabaseError>(())
        })?;

        info!(table = info.name(), id = info.id.as_u64(), "table defined");
        Ok(info)
    }

    /// Looks up a table definition by name.
    pub fn lookup_table(&self, name: &str) -> DatabaseResult<Arc<TableInfo>> {
        Ok(self.storage.catalog().lookup(name)?)
    }

    /// Drops a table and its rows.
    ///
    /// Without `cascade`, fails while other tables reference it. With
    /// `cascade`, their foreign keys to it are removed. Waits for
    /// transactions that wrote to the table to finish.
    pub fn drop_table(&self, name: &str, cascade: bool) -> DatabaseResult<()> {
        let _ddl = self.ddl_latch.lock();
        let dropped = self.storage.drop_table(name, cascade)?;
        self.wal.log_drop_table(DropTablePayload {
            table: name.to_string(),
            cascade,
        })?;

        info!(
            table = name,
            cascade,
            altered = dropped.altered.len(),
            "table dropped"
        );
        Ok(())
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Begins a transaction at the configured default isolation level.
    pub fn begin(&self) -> DatabaseResult<TxnId> {
        self.begin_transaction(self.config.default_isolation)
    }

    /// Begins a transaction.
    pub fn begin_transaction(&self, isolation: IsolationLevel) -> DatabaseResult<TxnId> {
        let txn = self.tm.begin_with_isolation(isolation)?;
        debug!(txn = txn.as_u64(), %isolation, "transaction started");
        Ok(txn)
    }

    /// Commits a transaction and returns its commit timestamp.
    ///
    /// On `SerializationFailure` or `DurabilityFailure` the transaction is
    /// aborted and none of its writes become visible.
    pub fn commit(&self, txn: TxnId) -> DatabaseResult<Timestamp> {
        let ts = self.tm.commit(txn)?;
        self.maybe_checkpoint();
        Ok(ts)
    }

    /// Rolls back a transaction. A no-op on a finished transaction.
    pub fn rollback(&self, txn: TxnId) -> DatabaseResult<()> {
        Ok(self.tm.rollback(txn)?)
    }

    /// Returns the state of a transaction.
    pub fn transaction_state(&self, txn: TxnId) -> DatabaseResult<TransactionState> {
        Ok(self.tm.state(txn)?)
    }

    // =========================================================================
    // Rows
    // =========================================================================

    /// Inserts a row and returns its id.
    pub fn insert(&self, txn: TxnId, table: &str, values: Vec<Value>) -> DatabaseResult<RowId> {
        Ok(self.storage.insert(txn, table, values)?)
    }

    /// Replaces the values of a row.
    pub fn update(
        &self,
        txn: TxnId,
        table: &str,
        row_id: RowId,
        values: Vec<Value>,
    ) -> DatabaseResult<()> {
        Ok(self.storage.update(txn, table, row_id, values)?)
    }

    /// Deletes a row, applying the referential actions of foreign keys that
    /// reference it.
    pub fn delete(&self, txn: TxnId, table: &str, row_id: RowId) -> DatabaseResult<()> {
        Ok(self.storage.delete(txn, table, row_id)?)
    }

    /// Returns a lazy stream of the rows of `table` matching `predicate`,
    /// optionally projected onto the named columns. Rows carry their id.
    pub fn select(
        &self,
        txn: TxnId,
        table: &str,
        predicate: &Predicate,
        projection: Option<&[&str]>,
    ) -> DatabaseResult<RowStream> {
        Ok(self.storage.select(txn, table, predicate, projection)?)
    }

    /// Joins two tables. Output columns are named `alias.column`.
    pub fn join(
        &self,
        txn: TxnId,
        kind: JoinKind,
        left: &TableRef,
        right: &TableRef,
        predicate: &JoinPredicate,
    ) -> DatabaseResult<RowStream> {
        Ok(self.storage.join(txn, kind, left, right, predicate)?)
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Rebuilds state from the log: replays committed transactions and DDL
    /// from the last complete checkpoint and discards uncommitted writes.
    ///
    /// Runs as part of opening; the database must not hold any tables or
    /// transactions yet.
    pub fn recover(&self) -> DatabaseResult<RecoveryStats> {
        if !self.storage.catalog().is_empty() || self.tm.active_count() > 0 {
            return Err(DatabaseError::Internal(
                "recovery needs a database without tables or transactions".to_string(),
            ));
        }

        let _ddl = self.ddl_latch.lock();
        let scan = self.wal.read_all()?;
        let recovered = recovery::replay(&self.storage, &scan.records)?;
        self.tm
            .restore(recovered.next_txn_id, recovered.last_commit);

        let stats = recovered.stats;
        info!(
            records = stats.records_scanned,
            replayed = stats.transactions_replayed,
            discarded = stats.transactions_discarded,
            tables = stats.tables,
            rows = stats.rows,
            "recovery complete"
        );
        *self.recovery.lock() = stats.clone();
        Ok(stats)
    }

    /// Returns the result of the last recovery run.
    pub fn last_recovery(&self) -> RecoveryStats {
        self.recovery.lock().clone()
    }

    /// Writes a checkpoint of all committed state and compacts the log to
    /// start at it. Returns the checkpoint's begin LSN.
    pub fn checkpoint(&self) -> DatabaseResult<Lsn> {
        let _ddl = self.ddl_latch.lock();
        let _commits = self.tm.pause_commits();

        let image = checkpoint::capture(&self.storage, self.tm.clock().visible())?;
        let lsn = self.wal.write_checkpoint(image)?;
        self.commits_since_checkpoint.store(0, Ordering::Relaxed);
        Ok(lsn)
    }

    fn maybe_checkpoint(&self) {
        let interval = self.config.checkpoint_interval;
        if interval == 0 {
            return;
        }
        let commits = self.commits_since_checkpoint.fetch_add(1, Ordering::Relaxed) + 1;
        if commits < interval {
            return;
        }
        // A failed checkpoint leaves the log as it was; the commit stands
        if let Err(err) = self.checkpoint() {
            error!(error = %err, "automatic checkpoint failed");
        }
    }

    /// Removes versions no active transaction can see.
    pub fn collect_garbage(&self) -> GcReport {
        let report = self.storage.collect_garbage();
        debug!(
            watermark = report.watermark.as_u64(),
            versions = report.vacuum.versions,
            rows = report.vacuum.rows,
            transactions = report.transactions,
            "garbage collected"
        );
        report
    }

    /// Lets commits through again after a durability failure, once the
    /// log's storage works. Writes of failed commits never replay.
    pub fn resume_durability(&self) -> DatabaseResult<()> {
        self.wal.resume()?;
        Ok(())
    }

    /// Returns statistics.
    pub fn stats(&self) -> DatabaseStats {
        let storage = self.storage.stats();
        let txns = self.tm.stats();
        let locks = self.tm.lock_stats();
        let wal = self.wal.stats();
        DatabaseStats {
            tables: storage.table_count,
            row_chains: storage.row_chains,
            active_transactions: self.tm.active_count(),
            transactions_started: txns.started.load(Ordering::Relaxed),
            transactions_committed: txns.committed.load(Ordering::Relaxed),
            transactions_aborted: txns.aborted.load(Ordering::Relaxed),
            serialization_failures: txns.serialization_failures.load(Ordering::Relaxed),
            durability_failures: txns.durability_failures.load(Ordering::Relaxed),
            lock_waits: locks.waits.load(Ordering::Relaxed),
            deadlocks: locks.deadlocks.load(Ordering::Relaxed),
            lock_timeouts: locks.timeouts.load(Ordering::Relaxed),
            wal_bytes: wal.bytes_written.load(Ordering::Relaxed),
            checkpoints: wal.checkpoints.load(Ordering::Relaxed),
            gc_runs: self.storage.gc_stats().runs.load(Ordering::Relaxed),
            durability_halted: self.wal.is_halted(),
            uptime: self.started_at.elapsed(),
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("config", &self.config)
            .field("storage", &self.storage)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_sql::executor::DataType;
    use tessera_sql::storage::ColumnDef;

    fn accounts() -> TableSchema {
        TableSchema::new("accounts")
            .column(ColumnDef::new("id", DataType::Integer))
            .column(ColumnDef::new("owner", DataType::Text))
            .primary_key(["id"])
    }

    fn open_on(log: &MemoryLogStorage, config: EngineConfig) -> Database {
        Database::with_log_storage(config, Arc::new(log.clone())).unwrap()
    }

    fn count(db: &Database, table: &str) -> usize {
        let txn = db.begin().unwrap();
        let n = db.select(txn, table, &Predicate::True, None).unwrap().count();
        db.commit(txn).unwrap();
        n
    }

    #[test]
    fn test_open_memory_and_define() {
        let db = Database::open_memory().unwrap();
        let info = db.define_table(accounts()).unwrap();
        assert_eq!(db.lookup_table("accounts").unwrap().id, info.id);
        assert!(matches!(
            db.define_table(accounts()),
            Err(DatabaseError::Schema(_))
        ));
        assert!(matches!(
            db.lookup_table("nope"),
            Err(DatabaseError::UnknownTable(_))
        ));
        assert_eq!(db.stats().tables, 1);
    }

    #[test]
    fn test_transaction_lifecycle() {
        let db = Database::open_memory().unwrap();
        db.define_table(accounts()).unwrap();

        let txn = db.begin().unwrap();
        db.insert(txn, "accounts", vec![Value::integer(1), Value::text("ann")])
            .unwrap();
        assert_eq!(db.transaction_state(txn).unwrap(), TransactionState::Active);
        db.commit(txn).unwrap();
        assert_eq!(db.transaction_state(txn).unwrap(), TransactionState::Committed);

        let err = db
            .insert(txn, "accounts", vec![Value::integer(2), Value::text("bo")])
            .unwrap_err();
        assert!(matches!(err, DatabaseError::TransactionNotActive { .. }));

        // Rollback of a finished transaction is a no-op
        db.rollback(txn).unwrap();
        assert!(matches!(
            db.rollback(TxnId::new(9999)),
            Err(DatabaseError::UnknownTransaction(_))
        ));
    }

    #[test]
    fn test_reopen_replays_committed_state() {
        let log = MemoryLogStorage::new();
        {
            let db = open_on(&log, EngineConfig::default());
            db.define_table(accounts()).unwrap();

            let txn = db.begin().unwrap();
            db.insert(txn, "accounts", vec![Value::integer(1), Value::text("ann")])
                .unwrap();
            db.commit(txn).unwrap();

            let pending = db.begin().unwrap();
            db.insert(pending, "accounts", vec![Value::integer(2), Value::text("bo")])
                .unwrap();
        }
        log.crash();

        let db = open_on(&log, EngineConfig::default());
        assert_eq!(count(&db, "accounts"), 1);
        let recovery = db.last_recovery();
        assert_eq!(recovery.tables, 1);
        assert_eq!(recovery.rows, 1);
        assert_eq!(recovery.transactions_replayed, 1);

        // New transactions and rows do not collide with recovered ones
        let txn = db.begin().unwrap();
        db.insert(txn, "accounts", vec![Value::integer(2), Value::text("bo")])
            .unwrap();
        db.commit(txn).unwrap();
        assert_eq!(count(&db, "accounts"), 2);

        assert!(matches!(db.recover(), Err(DatabaseError::Internal(_))));
    }

    #[test]
    fn test_drop_table_is_logged() {
        let log = MemoryLogStorage::new();
        {
            let db = open_on(&log, EngineConfig::default());
            db.define_table(accounts()).unwrap();
            db.drop_table("accounts", false).unwrap();
            db.define_table(accounts().column(ColumnDef::new("note", DataType::Text).nullable()))
                .unwrap();
        }

        let db = open_on(&log, EngineConfig::default());
        assert_eq!(db.lookup_table("accounts").unwrap().num_columns(), 3);
    }

    #[test]
    fn test_checkpoint_compacts_log() {
        let log = MemoryLogStorage::new();
        let db = open_on(&log, EngineConfig::default());
        db.define_table(accounts()).unwrap();
        for i in 0..20 {
            let txn = db.begin().unwrap();
            let row = db
                .insert(txn, "accounts", vec![Value::integer(i), Value::text("x")])
                .unwrap();
            db.update(txn, "accounts", row, vec![Value::integer(i), Value::text("y")])
                .unwrap();
            db.commit(txn).unwrap();
        }
        let before = log.synced_len();
        db.checkpoint().unwrap();
        assert!(log.synced_len() < before);
        assert_eq!(db.stats().checkpoints, 1);
        drop(db);

        let db = open_on(&log, EngineConfig::default());
        assert_eq!(count(&db, "accounts"), 20);
        assert!(db.last_recovery().start_lsn.is_valid());
    }

    #[test]
    fn test_automatic_checkpoint() {
        let log = MemoryLogStorage::new();
        let db = open_on(&log, EngineConfig::default().with_checkpoint_interval(3));
        db.define_table(accounts()).unwrap();
        for i in 0..7 {
            let txn = db.begin().unwrap();
            db.insert(txn, "accounts", vec![Value::integer(i), Value::text("x")])
                .unwrap();
            db.commit(txn).unwrap();
        }
        assert_eq!(db.stats().checkpoints, 2);
    }

    #[test]
    fn test_durability_failure_and_resume() {
        let log = MemoryLogStorage::new();
        let db = open_on(&log, EngineConfig::default());
        db.define_table(accounts()).unwrap();

        log.set_fail_writes(true);
        let txn = db.begin().unwrap();
        db.insert(txn, "accounts", vec![Value::integer(1), Value::text("ann")])
            .unwrap();
        let err = db.commit(txn).unwrap_err();
        assert!(matches!(err, DatabaseError::DurabilityFailure(_)));
        assert!(err.aborts_transaction());
        assert_eq!(db.transaction_state(txn).unwrap(), TransactionState::Aborted);
        log.set_fail_writes(false);

        // Halted until resumed
        let txn = db.begin().unwrap();
        db.insert(txn, "accounts", vec![Value::integer(2), Value::text("bo")])
            .unwrap();
        assert!(matches!(
            db.commit(txn),
            Err(DatabaseError::DurabilityFailure(_))
        ));
        assert!(db.stats().durability_halted);

        db.resume_durability().unwrap();
        let txn = db.begin().unwrap();
        db.insert(txn, "accounts", vec![Value::integer(3), Value::text("cy")])
            .unwrap();
        db.commit(txn).unwrap();
        assert_eq!(count(&db, "accounts"), 1);
        drop(db);

        let db = open_on(&log, EngineConfig::default());
        assert_eq!(count(&db, "accounts"), 1);
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::with_path(dir.path().join("data"));
        {
            let db = Database::open(config.clone()).unwrap();
            db.define_table(accounts()).unwrap();
            let txn = db.begin().unwrap();
            db.insert(txn, "accounts", vec![Value::integer(1), Value::text("ann")])
                .unwrap();
            db.commit(txn).unwrap();
        }
        let db = Database::open(config).unwrap();
        assert_eq!(count(&db, "accounts"), 1);
    }
}
