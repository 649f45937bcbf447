//! Table catalog.
//!
//! The catalog validates table definitions and resolves column names to
//! positions. It is a single registry shared as `Arc<Catalog>`; lookups run
//! concurrently, definitions are serialised by the caller.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

use tessera_common::TableId;

use super::error::{SchemaError, StorageError, StorageResult};
use super::schema::{ColumnDef, ReferentialAction, TableSchema};

/// A validated foreign key with positions resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyInfo {
    /// Referencing column positions.
    pub columns: Vec<usize>,
    /// Referenced table.
    pub target: TableId,
    /// Referenced table name.
    pub target_name: String,
    /// Referenced key column positions in the target.
    pub target_columns: Vec<usize>,
    /// Action on delete of a referenced row.
    pub on_delete: ReferentialAction,
    /// Action on change of a referenced key.
    pub on_update: ReferentialAction,
}

/// Information about a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    /// Table ID.
    pub id: TableId,
    /// Validated schema. Primary key columns are non-nullable.
    pub schema: TableSchema,
    /// Primary key column positions.
    pub primary_key: Vec<usize>,
    /// Unique key column positions.
    pub unique_keys: Vec<Vec<usize>>,
    /// Foreign keys.
    pub foreign_keys: Vec<ForeignKeyInfo>,
}

impl TableInfo {
    /// Returns the table name.
    pub fn name(&self) -> &str {
        &self.schema.name
    }

    /// Returns the columns.
    pub fn columns(&self) -> &[ColumnDef] {
        &self.schema.columns
    }

    /// Returns the number of columns.
    pub fn num_columns(&self) -> usize {
        self.schema.columns.len()
    }

    /// Returns the position of a column.
    pub fn column_index(&self, name: &str) -> StorageResult<usize> {
        self.schema
            .column_index(name)
            .ok_or_else(|| StorageError::UnknownColumn(format!("{}.{}", self.name(), name)))
    }

    /// Returns the names of the given column positions.
    pub fn column_names(&self, positions: &[usize]) -> Vec<String> {
        positions
            .iter()
            .filter_map(|&i| self.schema.columns.get(i).map(|c| c.name.clone()))
            .collect()
    }

    /// Returns the column sets that get an ordered index: the primary key,
    /// each unique key and each foreign key, without repeats.
    pub fn indexed_column_sets(&self) -> Vec<Vec<usize>> {
        let mut sets: Vec<Vec<usize>> = vec![self.primary_key.clone()];
        let candidates = self
            .unique_keys
            .iter()
            .chain(self.foreign_keys.iter().map(|fk| &fk.columns));
        for columns in candidates {
            if !sets.contains(columns) {
                sets.push(columns.clone());
            }
        }
        sets
    }

    /// Returns the foreign keys that point at the table `target`.
    pub fn foreign_keys_to(&self, target: TableId) -> impl Iterator<Item = &ForeignKeyInfo> {
        self.foreign_keys.iter().filter(move |fk| fk.target == target)
    }
}

/// Result of dropping a table.
#[derive(Debug, Clone)]
pub struct DroppedTable {
    /// The table removed.
    pub table: Arc<TableInfo>,
    /// Dependents whose foreign keys to it were removed.
    pub altered: Vec<Arc<TableInfo>>,
}

#[derive(Debug, Default)]
struct CatalogState {
    by_id: BTreeMap<TableId, Arc<TableInfo>>,
    by_name: HashMap<String, TableId>,
    next_id: u64,
}

/// Table catalog.
#[derive(Debug)]
pub struct Catalog {
    state: RwLock<CatalogState>,
}

impl Catalog {
    /// Creates a new empty catalog.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(CatalogState {
                next_id: TableId::FIRST.as_u64(),
                ..CatalogState::default()
            }),
        }
    }

    /// Validates and registers a table definition.
    pub fn define(&self, schema: TableSchema) -> StorageResult<Arc<TableInfo>> {
        let mut state = self.state.write();
        if state.by_name.contains_key(&schema.name) {
            return Err(SchemaError::DuplicateTable(schema.name).into());
        }

        let id = TableId::new(state.next_id);
        let info = Arc::new(resolve(id, schema, &state)?);
        state.next_id += 1;
        state.by_name.insert(info.name().to_string(), id);
        state.by_id.insert(id, Arc::clone(&info));
        Ok(info)
    }

    /// Looks up a table by name.
    pub fn lookup(&self, name: &str) -> StorageResult<Arc<TableInfo>> {
        let state = self.state.read();
        state
            .by_name
            .get(name)
            .and_then(|id| state.by_id.get(id))
            .cloned()
            .ok_or_else(|| StorageError::UnknownTable(name.to_string()))
    }

    /// Looks up a table by id.
    pub fn get(&self, id: TableId) -> Option<Arc<TableInfo>> {
        self.state.read().by_id.get(&id).cloned()
    }

    /// Returns the other tables with a foreign key to `target`.
    pub fn referencing(&self, target: TableId) -> Vec<Arc<TableInfo>> {
        self.state
            .read()
            .by_id
            .values()
            .filter(|t| t.id != target && t.foreign_keys_to(target).next().is_some())
            .cloned()
            .collect()
    }

    /// Removes a table.
    ///
    /// Fails with `ReferencedByForeignKey` while another table references
    /// it, unless `cascade` is set, in which case those foreign keys are
    /// removed from the dependents.
    pub fn drop_table(&self, name: &str, cascade: bool) -> StorageResult<DroppedTable> {
        let mut state = self.state.write();
        let id = *state
            .by_name
            .get(name)
            .ok_or_else(|| StorageError::UnknownTable(name.to_string()))?;

        let dependents: Vec<Arc<TableInfo>> = state
            .by_id
            .values()
            .filter(|t| t.id != id && t.foreign_keys_to(id).next().is_some())
            .cloned()
            .collect();

        if !dependents.is_empty() && !cascade {
            return Err(SchemaError::ReferencedByForeignKey {
                table: name.to_string(),
                referenced_by: dependents.iter().map(|t| t.name().to_string()).collect(),
            }
            .into());
        }

        let mut altered = Vec::with_capacity(dependents.len());
        for dependent in dependents {
            let mut info = (*dependent).clone();
            info.foreign_keys.retain(|fk| fk.target != id);
            info.schema
                .foreign_keys
                .retain(|fk| fk.references_table != name);
            let info = Arc::new(info);
            state.by_id.insert(info.id, Arc::clone(&info));
            altered.push(info);
        }

        state.by_name.remove(name);
        let table = state
            .by_id
            .remove(&id)
            .ok_or_else(|| StorageError::Internal(format!("catalog lost table {}", name)))?;

        Ok(DroppedTable { table, altered })
    }

    /// Returns every table in definition order.
    pub fn tables(&self) -> Vec<Arc<TableInfo>> {
        self.state.read().by_id.values().cloned().collect()
    }

    /// Returns true if a table with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.state.read().by_name.contains_key(name)
    }

    /// Returns the number of tables.
    pub fn len(&self) -> usize {
        self.state.read().by_id.len()
    }

    /// Returns true if there are no tables.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve_key(schema: &TableSchema, columns: &[String], what: &str) -> Result<Vec<usize>, SchemaError> {
    let table = &schema.name;
    if columns.is_empty() {
        return Err(SchemaError::invalid(table, format!("{} has no columns", what)));
    }
    let mut seen = HashSet::new();
    columns
        .iter()
        .map(|name| {
            let index = schema.column_index(name).ok_or_else(|| {
                SchemaError::invalid(table, format!("{} names unknown column {}", what, name))
            })?;
            if !seen.insert(index) {
                return Err(SchemaError::invalid(
                    table,
                    format!("{} repeats column {}", what, name),
                ));
            }
            Ok(index)
        })
        .collect()
}

fn resolve(id: TableId, mut schema: TableSchema, state: &CatalogState) -> Result<TableInfo, SchemaError> {
    let table = schema.name.clone();
    if table.is_empty() {
        return Err(SchemaError::invalid(&table, "table name is empty"));
    }
    if schema.columns.is_empty() {
        return Err(SchemaError::invalid(&table, "table has no columns"));
    }
    let mut names = HashSet::new();
    for column in &schema.columns {
        if !names.insert(column.name.as_str()) {
            return Err(SchemaError::invalid(
                &table,
                format!("duplicate column {}", column.name),
            ));
        }
    }

    if schema.primary_key.is_empty() {
        return Err(SchemaError::invalid(&table, "no primary key declared"));
    }
    let primary_key = resolve_key(&schema, &schema.primary_key, "primary key")?;
    for &i in &primary_key {
        schema.columns[i].nullable = false;
    }

    let unique_keys = schema
        .unique_keys
        .iter()
        .map(|key| resolve_key(&schema, key, "unique key"))
        .collect::<Result<Vec<_>, _>>()?;

    let mut foreign_keys = Vec::with_capacity(schema.foreign_keys.len());
    for fk in &schema.foreign_keys {
        let columns = resolve_key(&schema, &fk.columns, "foreign key")?;

        // A self reference resolves against the definition itself
        let (target, target_schema, target_pk, target_uniques) = if fk.references_table == table {
            (id, &schema, primary_key.clone(), unique_keys.clone())
        } else {
            let target = state
                .by_name
                .get(&fk.references_table)
                .and_then(|id| state.by_id.get(id))
                .ok_or_else(|| {
                    SchemaError::invalid(
                        &table,
                        format!("foreign key references unknown table {}", fk.references_table),
                    )
                })?;
            (
                target.id,
                &target.schema,
                target.primary_key.clone(),
                target.unique_keys.clone(),
            )
        };

        let target_columns = resolve_key(target_schema, &fk.references_columns, "referenced key")
            .map_err(|_| {
                SchemaError::invalid(
                    &table,
                    format!(
                        "foreign key references unknown columns ({}) of {}",
                        fk.references_columns.join(", "),
                        fk.references_table
                    ),
                )
            })?;
        if target_pk != target_columns && !target_uniques.contains(&target_columns) {
            return Err(SchemaError::invalid(
                &table,
                format!(
                    "foreign key target ({}) is not a key of {}",
                    fk.references_columns.join(", "),
                    fk.references_table
                ),
            ));
        }
        if columns.len() != target_columns.len() {
            return Err(SchemaError::invalid(
                &table,
                format!(
                    "foreign key has {} columns but the referenced key has {}",
                    columns.len(),
                    target_columns.len()
                ),
            ));
        }
        for (&c, &t) in columns.iter().zip(&target_columns) {
            let (column, referenced) = (&schema.columns[c], &target_schema.columns[t]);
            if column.data_type != referenced.data_type {
                return Err(SchemaError::invalid(
                    &table,
                    format!(
                        "foreign key column {} is {} but {}.{} is {}",
                        column.name,
                        column.data_type,
                        fk.references_table,
                        referenced.name,
                        referenced.data_type
                    ),
                ));
            }
        }
        let sets_null = fk.on_delete == ReferentialAction::SetNull
            || fk.on_update == ReferentialAction::SetNull;
        if sets_null {
            if let Some(&c) = columns.iter().find(|&&c| !schema.columns[c].nullable) {
                return Err(SchemaError::invalid(
                    &table,
                    format!(
                        "set null action on non-nullable column {}",
                        schema.columns[c].name
                    ),
                ));
            }
        }

        foreign_keys.push(ForeignKeyInfo {
            columns,
            target,
            target_name: fk.references_table.clone(),
            target_columns,
            on_delete: fk.on_delete,
            on_update: fk.on_update,
        });
    }

    Ok(TableInfo {
        id,
        schema,
        primary_key,
        unique_keys,
        foreign_keys,
    })
}
