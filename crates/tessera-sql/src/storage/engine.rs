//! Storage engine for managing all tables.
//!
//! `StorageEngine` owns the table stores and runs row statements against
//! them inside transactions. Statements that change rows are serialised by
//! a statement latch so constraint checks see a stable state; they never
//! wait for a row lock while holding it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use tessera_common::{RowId, RowKey, TableId, Timestamp, TxnId};
use tessera_mvcc::{GcStats, ReadItem, VersionHandle, VersionIdGenerator};
use tessera_txn::{TransactionManager, WriteRecord};

use crate::executor::{
    execute_join, BoundPredicate, JoinInput, JoinKind, JoinPredicate, Predicate, Row, RowStream, TableRef, Value,
};

use super::catalog::{Catalog, DroppedTable, TableInfo};
use super::constraints::{Plan, PlannedWrite, Planner, Statement};
use super::encoder::RowCodec;
use super::error::{StorageError, StorageResult};
use super::schema::TableSchema;
use super::table::{TableStore, VacuumStats};

/// Result of one garbage collection pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcReport {
    /// Watermark the pass ran at.
    pub watermark: Timestamp,
    /// Versions, rows and index entries removed.
    pub vacuum: VacuumStats,
    /// Finished transactions forgotten.
    pub transactions: u64,
}

/// Storage engine statistics.
#[derive(Debug, Clone, Default)]
pub struct StorageStats {
    /// Number of tables.
    pub table_count: usize,
    /// Row chains across all tables, including deleted rows awaiting GC.
    pub row_chains: usize,
}

/// Storage engine that manages all tables.
pub struct StorageEngine {
    catalog: Arc<Catalog>,
    tm: Arc<TransactionManager>,
    tables: RwLock<HashMap<TableId, Arc<TableStore>>>,
    statement_latch: Mutex<()>,
    versions: VersionIdGenerator,
    gc_stats: GcStats,
}

impl StorageEngine {
    /// Creates an engine over `catalog`, running statements through `tm`.
    pub fn new(catalog: Arc<Catalog>, tm: Arc<TransactionManager>) -> Self {
        let tables = catalog
            .tables()
            .into_iter()
            .map(|info| (info.id, Arc::new(TableStore::new(info))))
            .collect();
        Self {
            catalog,
            tm,
            tables: RwLock::new(tables),
            statement_latch: Mutex::new(()),
            versions: VersionIdGenerator::new(),
            gc_stats: GcStats::new(),
        }
    }

    /// Returns the catalog.
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Returns the transaction manager.
    pub fn transaction_manager(&self) -> &Arc<TransactionManager> {
        &self.tm
    }

    /// Returns garbage collection statistics.
    pub fn gc_stats(&self) -> &GcStats {
        &self.gc_stats
    }

    // =========================================================================
    // DDL Operations
    // =========================================================================

    /// Defines a table and creates its (empty) store.
    pub fn create_table(&self, schema: TableSchema) -> StorageResult<Arc<TableInfo>> {
        self.create_table_with(schema, |_| Ok::<(), StorageError>(()))
    }

    /// Creates a table, running `publish` before any statement can write
    /// to it. If `publish` fails the table is removed again.
    ///
    /// Statements queue on the statement latch until `publish` returns, so
    /// whatever it logs precedes every write to the new table.
    pub fn create_table_with<E>(
        &self,
        schema: TableSchema,
        publish: impl FnOnce(&Arc<TableInfo>) -> Result<(), E>,
    ) -> Result<Arc<TableInfo>, E>
    where
        E: From<StorageError>,
    {
        let _latch = self.statement_latch.lock();
        let info = self.catalog.define(schema)?;
        self.tables
            .write()
            .insert(info.id, Arc::new(TableStore::new(Arc::clone(&info))));

        if let Err(err) = publish(&info) {
            self.tables.write().remove(&info.id);
            if let Err(undo) = self.catalog.drop_table(info.name(), false) {
                warn!(table = info.name(), error = %undo, "could not withdraw unpublished table");
            }
            return Err(err);
        }

        debug!(table = info.name(), id = info.id.as_u64(), "table created");
        Ok(info)
    }

    /// Drops a table and its rows.
    ///
    /// Waits for transactions with writes on the table to finish. With
    /// `cascade`, dependents lose their foreign keys to the table but keep
    /// their rows.
    pub fn drop_table(&self, name: &str, cascade: bool) -> StorageResult<DroppedTable> {
        let info = self.catalog.lookup(name)?;
        self.tm.with_table_lock(info.id, || {
            let _latch = self.statement_latch.lock();
            let dropped = self.catalog.drop_table(name, cascade)?;
            let mut tables = self.tables.write();
            tables.remove(&dropped.table.id);
            for altered in &dropped.altered {
                if let Some(store) = tables.get(&altered.id) {
                    store.set_info(Arc::clone(altered));
                }
            }
            Ok(dropped)
        })?
    }

    /// Returns a table's store.
    ///
    /// A table whose definition is still being published has no store yet
    /// and reads as unknown.
    pub fn store(&self, name: &str) -> StorageResult<Arc<TableStore>> {
        let info = self.catalog.lookup(name)?;
        self.tables
            .read()
            .get(&info.id)
            .cloned()
            .ok_or_else(|| StorageError::UnknownTable(name.to_string()))
    }

    // =========================================================================
    // DML Operations
    // =========================================================================

    /// Inserts a row and returns its new id.
    pub fn insert(&self, txn: TxnId, table: &str, values: Vec<Value>) -> StorageResult<RowId> {
        let store = self.store(table)?;
        self.tm.ensure_active(txn)?;
        let row_id = store.allocate_row_id();
        self.tm.lock_row(txn, RowKey::new(store.id(), row_id))?;
        self.execute(
            txn,
            Statement::Insert {
                store,
                row_id,
                values,
            },
        )?;
        Ok(row_id)
    }

    /// Replaces a row's values.
    pub fn update(
        &self,
        txn: TxnId,
        table: &str,
        row_id: RowId,
        values: Vec<Value>,
    ) -> StorageResult<()> {
        let store = self.store(table)?;
        self.tm.lock_row(txn, RowKey::new(store.id(), row_id))?;
        self.execute(
            txn,
            Statement::Update {
                store,
                row_id,
                values,
            },
        )
    }

    /// Deletes a row, applying referential actions to rows referencing it.
    pub fn delete(&self, txn: TxnId, table: &str, row_id: RowId) -> StorageResult<()> {
        let store = self.store(table)?;
        self.tm.lock_row(txn, RowKey::new(store.id(), row_id))?;
        self.execute(txn, Statement::Delete { store, row_id })
    }

    fn execute(&self, txn: TxnId, statement: Statement) -> StorageResult<()> {
        let mut statement = Some(statement);
        loop {
            let latch = self.statement_latch.lock();
            let snapshot = self.tm.snapshot(txn)?;
            let stores = self.tables.read().clone();
            let current = statement
                .take()
                .ok_or_else(|| StorageError::Internal("statement consumed".to_string()))?;
            let retry = current.clone();
            let plan = Planner::new(&self.catalog, &self.tm, &stores, txn, snapshot).plan(current)?;

            match plan {
                Plan::Ready(writes) => return self.apply(txn, writes),
                Plan::Blocked(keys) => {
                    drop(latch);
                    debug!(txn = txn.as_u64(), rows = keys.len(), "statement waiting for row locks");
                    for key in keys {
                        self.tm.lock_row(txn, key)?;
                    }
                    statement = Some(retry);
                }
            }
        }
    }

    fn apply(&self, txn: TxnId, writes: Vec<PlannedWrite>) -> StorageResult<()> {
        for write in writes {
            let info = write.store.info();
            let version = self.versions.next_id();
            let kind = write.kind();
            let before = write.before.as_ref().map(|row| RowCodec::encode(row.values()));
            let after = write.after.as_ref().map(|row| RowCodec::encode(row.values()));
            let chain = write.store.install(write.row_id, version, txn, write.after);

            let record = WriteRecord {
                table_id: info.id,
                table_name: info.name().to_string(),
                row_id: write.row_id,
                kind,
                before,
                after,
                chain: Arc::clone(&chain) as Arc<dyn VersionHandle>,
                version,
            };
            if let Err(err) = self.tm.register_write(txn, record) {
                chain.abort_version(version);
                return Err(err.into());
            }
        }
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Returns the rows of `table` matching `predicate`, optionally
    /// projected onto `projection`.
    ///
    /// The stream is lazy and reads in the transaction's snapshot. It stays
    /// consistent while the transaction is active.
    pub fn select(
        &self,
        txn: TxnId,
        table: &str,
        predicate: &Predicate,
        projection: Option<&[&str]>,
    ) -> StorageResult<RowStream> {
        let store = self.store(table)?;
        let info = store.info();
        let bound = predicate.bind(info.columns())?;
        let indices = match projection {
            Some(names) => Some(
                names
                    .iter()
                    .map(|name| info.column_index(name))
                    .collect::<StorageResult<Vec<_>>>()?,
            ),
            None => None,
        };

        let snapshot = self.tm.snapshot(txn)?;
        self.tm.record_read(txn, ReadItem::Table(info.id));
        let candidates = store.index_candidates(&bound);
        let cursor = store.scan(snapshot, bound, candidates);

        Ok(match indices {
            Some(indices) => {
                let columns = info.column_names(&indices);
                RowStream::new(columns, cursor.map(move |row| row.project(&indices)))
            }
            None => RowStream::new(info.schema.column_names(), cursor),
        })
    }

    /// Joins two tables.
    ///
    /// Joining a table with itself scans it once and requires distinct
    /// aliases.
    pub fn join(
        &self,
        txn: TxnId,
        kind: JoinKind,
        left: &TableRef,
        right: &TableRef,
        predicate: &JoinPredicate,
    ) -> StorageResult<RowStream> {
        let same_table = left.table == right.table;
        if kind == JoinKind::SelfJoin && !same_table {
            return Err(StorageError::InvalidJoin(format!(
                "self join of different tables {} and {}",
                left.table, right.table
            )));
        }
        if same_table && left.alias() == right.alias() {
            return Err(StorageError::InvalidJoin(format!(
                "joining {} with itself needs two distinct aliases",
                left.table
            )));
        }

        let left_store = self.store(&left.table)?;
        let right_store = self.store(&right.table)?;
        let left_info = left_store.info();
        let right_info = right_store.info();
        let bound = predicate.bind(left_info.columns(), right_info.columns())?;

        let snapshot = self.tm.snapshot(txn)?;
        self.tm.record_read(txn, ReadItem::Table(left_info.id));
        self.tm.record_read(txn, ReadItem::Table(right_info.id));

        let scan = |store: &Arc<TableStore>| -> Arc<Vec<Row>> {
            Arc::new(
                store
                    .scan(snapshot, BoundPredicate::True, None)
                    .collect(),
            )
        };
        let left_rows = scan(&left_store);
        let right_rows = if same_table {
            Arc::clone(&left_rows)
        } else {
            scan(&right_store)
        };

        Ok(execute_join(
            kind,
            JoinInput::new(left.alias(), left_info.schema.column_names(), left_rows),
            JoinInput::new(right.alias(), right_info.schema.column_names(), right_rows),
            &bound,
        ))
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Prunes versions no active transaction can see, drops dead rows and
    /// stale index entries, and forgets finished transactions.
    pub fn collect_garbage(&self) -> GcReport {
        let _latch = self.statement_latch.lock();
        let watermark = self.tm.gc_watermark();
        let stores: Vec<Arc<TableStore>> = self.tables.read().values().cloned().collect();

        let mut vacuum = VacuumStats::default();
        for store in stores {
            vacuum.add(store.vacuum(watermark));
        }
        let transactions = self.tm.collect(watermark) as u64;
        self.gc_stats
            .record_run(vacuum.versions, vacuum.rows, vacuum.index_entries, transactions);

        GcReport {
            watermark,
            vacuum,
            transactions,
        }
    }

    /// Returns every table with its newest committed rows, in definition
    /// order. Callers hold off commits while taking it.
    pub fn committed_image(&self) -> Vec<(Arc<TableInfo>, Vec<Row>)> {
        let tables = self.tables.read();
        self.catalog
            .tables()
            .into_iter()
            .map(|info| {
                let rows = tables
                    .get(&info.id)
                    .map(|store| store.committed_rows())
                    .unwrap_or_default();
                (info, rows)
            })
            .collect()
    }

    /// Applies a logged row image as committed state. `None` removes the
    /// row.
    pub fn replay_row(&self, table: &str, row_id: RowId, values: Option<Vec<Value>>) -> StorageResult<()> {
        let store = self.store(table)?;
        if let Some(values) = &values {
            if values.len() != store.info().num_columns() {
                return Err(StorageError::Encoding(format!(
                    "logged row for {} has {} values",
                    table,
                    values.len()
                )));
            }
        }
        let row = values.map(|values| Row::with_id(row_id, values));
        store.restore_row(row_id, self.versions.next_id(), Timestamp::ZERO, row);
        Ok(())
    }

    /// Returns statistics.
    pub fn stats(&self) -> StorageStats {
        let tables = self.tables.read();
        StorageStats {
            table_count: tables.len(),
            row_chains: tables.values().map(|t| t.chain_count()).sum(),
        }
    }
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("tables", &self.tables.read().len())
            .finish()
    }
}
