//! Write planning and constraint enforcement.
//!
//! Every statement is planned in full before anything is installed:
//!
//! ```text
//!   statement ──► check types/nulls ──► primary key ──► unique keys
//!                                                          │
//!            ┌─────────────── foreign keys (parent exists) ◄┘
//!            ▼
//!   referencing rows ──► restrict │ cascade │ set null   (depth-first,
//!            │                         │                  explicit stack)
//!            └───────────── overlay of planned row states ┘
//! ```
//!
//! The overlay holds the state each touched row will have once the
//! statement applies, so later checks in the same statement see earlier
//! effects. Uniqueness is judged against every possible outcome of
//! in-flight transactions. Rows the statement will write must be locked by
//! the writing transaction; when a lock is missing the plan comes back
//! `Blocked` and the engine locks those rows and plans again.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;

use tessera_common::{RowId, RowKey, TableId, TxnId};
use tessera_mvcc::{ReadItem, Snapshot};
use tessera_txn::{TransactionManager, WriteKind};

use crate::executor::{Row, Value};

use super::catalog::{Catalog, ForeignKeyInfo, TableInfo};
use super::error::{ConstraintViolation, StorageError};
use super::schema::ReferentialAction;
use super::table::TableStore;

/// A statement handed to the planner.
#[derive(Clone)]
pub(crate) enum Statement {
    Insert {
        store: Arc<TableStore>,
        row_id: RowId,
        values: Vec<Value>,
    },
    Update {
        store: Arc<TableStore>,
        row_id: RowId,
        values: Vec<Value>,
    },
    Delete {
        store: Arc<TableStore>,
        row_id: RowId,
    },
}

/// One row change of a fully planned statement.
pub(crate) struct PlannedWrite {
    pub store: Arc<TableStore>,
    pub row_id: RowId,
    pub before: Option<Row>,
    pub after: Option<Row>,
}

impl PlannedWrite {
    pub fn kind(&self) -> WriteKind {
        match (&self.before, &self.after) {
            (None, _) => WriteKind::Insert,
            (Some(_), None) => WriteKind::Delete,
            (Some(_), Some(_)) => WriteKind::Update,
        }
    }
}

/// Outcome of planning.
pub(crate) enum Plan {
    /// Every check passed and every written row is locked.
    Ready(Vec<PlannedWrite>),
    /// These rows must be locked before the statement can be planned.
    Blocked(Vec<RowKey>),
}

enum PlanError {
    Blocked,
    Failed(StorageError),
}

impl From<StorageError> for PlanError {
    fn from(err: StorageError) -> Self {
        PlanError::Failed(err)
    }
}

impl From<ConstraintViolation> for PlanError {
    fn from(err: ConstraintViolation) -> Self {
        PlanError::Failed(err.into())
    }
}

type PlanResult<T> = Result<T, PlanError>;

/// How a visited row changes.
enum Change {
    Delete,
    Replace(Vec<Value>),
    Assign(Vec<(usize, Value)>),
}

enum Task {
    Visit {
        store: Arc<TableStore>,
        row_id: RowId,
        change: Change,
    },
    Leave(RowKey),
}

/// Plans one statement for one transaction.
pub(crate) struct Planner<'a> {
    catalog: &'a Catalog,
    tm: &'a TransactionManager,
    stores: &'a HashMap<TableId, Arc<TableStore>>,
    txn: TxnId,
    snapshot: Snapshot,
    overlay: HashMap<RowKey, Option<Row>>,
    originals: HashMap<RowKey, Option<Row>>,
    order: Vec<(RowKey, Arc<TableStore>)>,
    path: HashSet<RowKey>,
    missing: Vec<RowKey>,
}

impl<'a> Planner<'a> {
    pub fn new(
        catalog: &'a Catalog,
        tm: &'a TransactionManager,
        stores: &'a HashMap<TableId, Arc<TableStore>>,
        txn: TxnId,
        snapshot: Snapshot,
    ) -> Self {
        Self {
            catalog,
            tm,
            stores,
            txn,
            snapshot,
            overlay: HashMap::new(),
            originals: HashMap::new(),
            order: Vec::new(),
            path: HashSet::new(),
            missing: Vec::new(),
        }
    }

    pub fn plan(mut self, statement: Statement) -> Result<Plan, StorageError> {
        match self.plan_statement(statement) {
            Ok(()) if self.missing.is_empty() => Ok(Plan::Ready(self.into_writes())),
            Ok(()) | Err(PlanError::Blocked) => Ok(Plan::Blocked(self.missing)),
            Err(PlanError::Failed(err)) => Err(err),
        }
    }

    fn plan_statement(&mut self, statement: Statement) -> PlanResult<()> {
        match statement {
            Statement::Insert {
                store,
                row_id,
                values,
            } => {
                let info = store.info();
                check_row(&info, &values)?;
                let key = RowKey::new(info.id, row_id);
                self.claim(&store, row_id)?;

                let row = Row::with_id(row_id, values);
                self.check_keys(&store, &info, &row)?;
                self.set(key, &store, None, Some(row.clone()));
                self.check_references(&info, &row, None)
            }
            Statement::Update {
                store,
                row_id,
                values,
            } => {
                let info = store.info();
                check_row(&info, &values)?;
                self.root_row(&store, row_id)?;
                self.traverse(store, row_id, Change::Replace(values))
            }
            Statement::Delete { store, row_id } => {
                self.root_row(&store, row_id)?;
                self.traverse(store, row_id, Change::Delete)
            }
        }
    }

    /// The addressed row must be visible to the transaction and still exist.
    fn root_row(&mut self, store: &Arc<TableStore>, row_id: RowId) -> PlanResult<()> {
        let info = store.info();
        let not_found = || StorageError::RowNotFound {
            table: info.name().to_string(),
            row_id,
        };
        if store.read(row_id, &self.snapshot).is_none() {
            return Err(not_found().into());
        }
        self.tm
            .record_read(self.txn, ReadItem::Row(RowKey::new(info.id, row_id)));
        self.claim(store, row_id)?;
        if self.current(store, row_id).is_none() {
            return Err(not_found().into());
        }
        Ok(())
    }

    fn traverse(&mut self, store: Arc<TableStore>, row_id: RowId, change: Change) -> PlanResult<()> {
        let mut stack = vec![Task::Visit {
            store,
            row_id,
            change,
        }];

        while let Some(task) = stack.pop() {
            let (store, row_id, change) = match task {
                Task::Leave(key) => {
                    self.path.remove(&key);
                    continue;
                }
                Task::Visit {
                    store,
                    row_id,
                    change,
                } => (store, row_id, change),
            };

            let info = store.info();
            let key = RowKey::new(info.id, row_id);
            if self.path.contains(&key) {
                return Err(ConstraintViolation::CyclicCascade {
                    table: info.name().to_string(),
                    row_id,
                }
                .into());
            }
            self.claim(&store, row_id)?;

            // Already deleted earlier in this statement (a diamond)
            let Some(old) = self.current(&store, row_id) else {
                continue;
            };
            let new = match change {
                Change::Delete => None,
                Change::Replace(values) => Some(Row::with_id(row_id, values)),
                Change::Assign(assignments) => {
                    let mut values = old.values().to_vec();
                    for (column, value) in assignments {
                        values[column] = value;
                    }
                    Some(Row::with_id(row_id, values))
                }
            };
            if new.as_ref() == Some(&old) {
                continue;
            }

            if let Some(row) = &new {
                self.check_keys(&store, &info, row)?;
            }
            let before = self.original(&store, row_id);
            self.set(key, &store, before, new.clone());
            if let Some(row) = &new {
                self.check_references(&info, row, Some(&old))?;
            }

            self.path.insert(key);
            stack.push(Task::Leave(key));
            let children = self.referencing_tasks(&info, row_id, &old, new.as_ref())?;
            stack.extend(children.into_iter().rev());
        }
        Ok(())
    }

    /// Works out what happens to rows referencing a changed or deleted row.
    fn referencing_tasks(
        &mut self,
        parent: &TableInfo,
        parent_row: RowId,
        old: &Row,
        new: Option<&Row>,
    ) -> PlanResult<Vec<Task>> {
        let mut tasks = Vec::new();
        let dependents: Vec<Arc<TableInfo>> = self
            .catalog
            .tables()
            .into_iter()
            .filter(|t| t.foreign_keys_to(parent.id).next().is_some())
            .collect();

        for dependent in dependents {
            let store = self.store(dependent.id)?;
            for fk in dependent.foreign_keys_to(parent.id) {
                let old_key = key_of(old.values(), &fk.target_columns);
                if old_key.iter().any(Value::is_null) {
                    continue;
                }
                let action = match new {
                    None => fk.on_delete,
                    Some(row) if key_of(row.values(), &fk.target_columns) == old_key => continue,
                    Some(_) => fk.on_update,
                };

                // A row referencing itself does not hold itself back
                let exclude = (dependent.id == parent.id).then_some(parent_row);
                let rows = self.referencing_rows(&store, &fk.columns, &old_key, exclude);
                for row_id in rows {
                    let change = match action {
                        ReferentialAction::Restrict => {
                            return Err(ConstraintViolation::ForeignKey {
                                table: dependent.name().to_string(),
                                columns: dependent.column_names(&fk.columns),
                                references: fk.target_name.clone(),
                                detail: format!(
                                    "row {} still references key {}",
                                    row_id,
                                    format_key(&old_key)
                                ),
                            }
                            .into());
                        }
                        ReferentialAction::Cascade => match new {
                            None => Change::Delete,
                            Some(row) => Change::Assign(cascaded_values(fk, row)),
                        },
                        ReferentialAction::SetNull => Change::Assign(
                            fk.columns.iter().map(|&c| (c, Value::Null)).collect(),
                        ),
                    };
                    tasks.push(Task::Visit {
                        store: Arc::clone(&store),
                        row_id,
                        change,
                    });
                }
            }
        }
        Ok(tasks)
    }

    /// Rows of `store` that hold `key` on `columns` in some possible state.
    ///
    /// A row on the current cascade path is judged by its state before the
    /// statement, so a cascade that loops back to it is seen as a cycle.
    fn referencing_rows(
        &self,
        store: &TableStore,
        columns: &[usize],
        key: &[Value],
        exclude: Option<RowId>,
    ) -> Vec<RowId> {
        let holds = |row: &Row| key_of(row.values(), columns) == key;
        self.rows_with_key(store, columns, key)
            .into_iter()
            .filter(|&row_id| Some(row_id) != exclude)
            .filter(|&row_id| {
                let on_path = self.path.contains(&RowKey::new(store.id(), row_id));
                (on_path && self.original(store, row_id).as_ref().map_or(false, holds))
                    || self.states(store, row_id).iter().flatten().any(holds)
            })
            .collect()
    }

    /// Index candidates plus rows already touched by this statement.
    fn rows_with_key(&self, store: &TableStore, columns: &[usize], key: &[Value]) -> BTreeSet<RowId> {
        let table = store.id();
        let mut rows: BTreeSet<RowId> = store.candidates(columns, key).into_iter().collect();
        rows.extend(
            self.overlay
                .keys()
                .filter(|k| k.table == table)
                .map(|k| k.row),
        );
        rows
    }

    fn check_keys(&self, store: &TableStore, info: &TableInfo, row: &Row) -> PlanResult<()> {
        let row_id = row.id().unwrap_or(RowId::INVALID);

        let key = key_of(row.values(), &info.primary_key);
        if self.key_taken(store, &info.primary_key, &key, row_id) {
            return Err(ConstraintViolation::PrimaryKey {
                table: info.name().to_string(),
                key: format_key(&key),
            }
            .into());
        }

        for columns in &info.unique_keys {
            let key = key_of(row.values(), columns);
            if key.iter().any(Value::is_null) {
                continue;
            }
            if self.key_taken(store, columns, &key, row_id) {
                return Err(ConstraintViolation::Unique {
                    table: info.name().to_string(),
                    columns: info.column_names(columns),
                    key: format_key(&key),
                }
                .into());
            }
        }
        Ok(())
    }

    /// True if another row holds `key` in any possible outcome.
    fn key_taken(&self, store: &TableStore, columns: &[usize], key: &[Value], row_id: RowId) -> bool {
        self.rows_with_key(store, columns, key)
            .into_iter()
            .filter(|&other| other != row_id)
            .any(|other| {
                self.states(store, other)
                    .iter()
                    .flatten()
                    .any(|row| key_of(row.values(), columns) == key)
            })
    }

    /// Checks that every foreign key of `row` has a parent. With `old`,
    /// only keys whose values changed are checked.
    fn check_references(&self, info: &TableInfo, row: &Row, old: Option<&Row>) -> PlanResult<()> {
        for fk in &info.foreign_keys {
            let key = key_of(row.values(), &fk.columns);
            if key.iter().any(Value::is_null) {
                continue;
            }
            if old.map_or(false, |old| key_of(old.values(), &fk.columns) == key) {
                continue;
            }
            let parent = self.store(fk.target)?;
            if !self.parent_exists(&parent, &fk.target_columns, &key) {
                return Err(ConstraintViolation::ForeignKey {
                    table: info.name().to_string(),
                    columns: info.column_names(&fk.columns),
                    references: fk.target_name.clone(),
                    detail: format!("no row with key {}", format_key(&key)),
                }
                .into());
            }
        }
        Ok(())
    }

    /// A parent counts when the writer can see it and no possible outcome
    /// of an in-flight transaction removes it.
    fn parent_exists(&self, store: &TableStore, columns: &[usize], key: &[Value]) -> bool {
        let table = store.id();
        let holds = |row: &Option<Row>| {
            row.as_ref()
                .map_or(false, |r| key_of(r.values(), columns) == key)
        };

        for row_id in self.rows_with_key(store, columns, key) {
            let row_key = RowKey::new(table, row_id);
            if let Some(planned) = self.overlay.get(&row_key) {
                if holds(planned) {
                    return true;
                }
                continue;
            }
            let Some(chain) = store.chain(row_id) else {
                continue;
            };
            if holds(&chain.read(&self.snapshot)) && chain.possible_states(self.txn).iter().all(holds)
            {
                self.tm.record_read(self.txn, ReadItem::Row(row_key));
                return true;
            }
        }
        false
    }

    /// Notes that the statement writes a row. A row another transaction is
    /// still writing cannot be planned until its lock is ours.
    fn claim(&mut self, store: &TableStore, row_id: RowId) -> PlanResult<()> {
        let key = RowKey::new(store.id(), row_id);
        if self.tm.holds_row_lock(self.txn, key) {
            return Ok(());
        }
        if !self.missing.contains(&key) {
            self.missing.push(key);
        }
        let foreign_writer = store
            .chain(row_id)
            .and_then(|chain| chain.pending_writer())
            .map_or(false, |writer| writer != self.txn);
        if foreign_writer {
            return Err(PlanError::Blocked);
        }
        Ok(())
    }

    /// Every state the row may be in: the planned one, else the possible
    /// outcomes of in-flight writers.
    fn states(&self, store: &TableStore, row_id: RowId) -> Vec<Option<Row>> {
        if let Some(planned) = self.overlay.get(&RowKey::new(store.id(), row_id)) {
            return vec![planned.clone()];
        }
        store
            .chain(row_id)
            .map_or_else(|| vec![None], |chain| chain.possible_states(self.txn))
    }

    /// The row's state for a claimed row.
    fn current(&self, store: &TableStore, row_id: RowId) -> Option<Row> {
        self.states(store, row_id).into_iter().next().flatten()
    }

    /// The row's state before this statement.
    fn original(&self, store: &TableStore, row_id: RowId) -> Option<Row> {
        let key = RowKey::new(store.id(), row_id);
        match self.originals.get(&key) {
            Some(original) => original.clone(),
            None => store
                .chain(row_id)
                .and_then(|chain| chain.possible_states(self.txn).into_iter().next())
                .flatten(),
        }
    }

    fn set(&mut self, key: RowKey, store: &Arc<TableStore>, before: Option<Row>, after: Option<Row>) {
        if !self.originals.contains_key(&key) {
            self.originals.insert(key, before);
            self.order.push((key, Arc::clone(store)));
        }
        self.overlay.insert(key, after);
    }

    fn store(&self, table: TableId) -> Result<Arc<TableStore>, StorageError> {
        self.stores
            .get(&table)
            .cloned()
            .ok_or_else(|| StorageError::Internal(format!("no store for table {}", table)))
    }

    fn into_writes(mut self) -> Vec<PlannedWrite> {
        let order = std::mem::take(&mut self.order);
        order
            .into_iter()
            .filter_map(|(key, store)| {
                let before = self.originals.remove(&key).flatten();
                let after = self.overlay.remove(&key).flatten();
                (before != after).then_some(PlannedWrite {
                    store,
                    row_id: key.row,
                    before,
                    after,
                })
            })
            .collect()
    }
}

/// Checks arity, types and nullability.
pub(crate) fn check_row(info: &TableInfo, values: &[Value]) -> Result<(), ConstraintViolation> {
    if values.len() != info.num_columns() {
        return Err(ConstraintViolation::ColumnCount {
            table: info.name().to_string(),
            expected: info.num_columns(),
            found: values.len(),
        });
    }
    for (column, value) in info.columns().iter().zip(values) {
        if !value.fits(column.data_type) {
            return Err(ConstraintViolation::TypeMismatch {
                table: info.name().to_string(),
                column: column.name.clone(),
                expected: column.data_type,
                found: value.to_string(),
            });
        }
        if value.is_null() && !column.nullable {
            return Err(ConstraintViolation::NotNull {
                table: info.name().to_string(),
                column: column.name.clone(),
            });
        }
    }
    Ok(())
}

/// New referencing values for a cascaded key update.
fn cascaded_values(fk: &ForeignKeyInfo, parent: &Row) -> Vec<(usize, Value)> {
    fk.columns
        .iter()
        .zip(&fk.target_columns)
        .map(|(&column, &target)| (column, parent.values()[target].clone()))
        .collect()
}

fn key_of(values: &[Value], columns: &[usize]) -> Vec<Value> {
    columns
        .iter()
        .map(|&c| values.get(c).cloned().unwrap_or(Value::Null))
        .collect()
}

fn format_key(key: &[Value]) -> String {
    let mut out = String::from("(");
    for (i, value) in key.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{}", value);
    }
    out.push(')');
    out
}
