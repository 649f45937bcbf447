//! # tessera-test
//!
//! Integration tests for Tessera.
//!
//! This crate contains:
//! - Shared fixtures (the Customers/Orders and Employees tables)
//! - Helpers for crash simulation on an in-memory log
//! - The integration suites under `tests/`

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use tessera_db::{
    ColumnDef, DataType, Database, DatabaseResult, EngineConfig, ForeignKeyDef, Predicate,
    ReferentialAction, RowId, RowStream, TableSchema, Value,
};
use tessera_wal::MemoryLogStorage;

/// Installs a fmt subscriber filtered by `RUST_LOG` that writes through the
/// test harness. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Opens an in-memory database.
pub fn memory_db() -> Database {
    init_tracing();
    Database::open_memory().expect("open in-memory database")
}

/// Opens a database on a shared in-memory log, so a test can drop it,
/// crash the log and open it again.
pub fn open_on(log: &MemoryLogStorage, config: EngineConfig) -> Database {
    init_tracing();
    Database::with_log_storage(config, Arc::new(log.clone())).expect("open database on log")
}

/// Collects the values of every row in a stream.
pub fn values(stream: RowStream) -> Vec<Vec<Value>> {
    stream.map(|row| row.into_values()).collect()
}

/// Returns every visible row of `table` with its id, in id order, read in
/// a fresh transaction.
pub fn table_contents(db: &Database, table: &str) -> Vec<(RowId, Vec<Value>)> {
    let txn = db.begin().expect("begin");
    let rows = db
        .select(txn, table, &Predicate::True, None)
        .expect("select")
        .filter_map(|row| row.id().map(|id| (id, row.into_values())))
        .collect();
    db.commit(txn).expect("commit read-only transaction");
    rows
}

/// Customers (id, name).
pub fn customers_schema() -> TableSchema {
    TableSchema::new("customers")
        .column(ColumnDef::new("id", DataType::Integer))
        .column(ColumnDef::new("name", DataType::Text))
        .primary_key(["id"])
}

/// Orders (order_id, customer_id, product) referencing customers.
pub fn orders_schema(on_delete: ReferentialAction) -> TableSchema {
    TableSchema::new("orders")
        .column(ColumnDef::new("order_id", DataType::Integer))
        .column(ColumnDef::new("customer_id", DataType::Integer).nullable())
        .column(ColumnDef::new("product", DataType::Text))
        .primary_key(["order_id"])
        .foreign_key(
            ForeignKeyDef::new(["customer_id"], "customers", ["id"])
                .on_delete(on_delete)
                .on_update(ReferentialAction::Cascade),
        )
}

/// Defines and fills Customers {(1, Alice), (2, Bob), (3, Charlie)} and
/// Orders {(101, 1, Laptop), (102, 2, Keyboard)}.
pub fn customers_orders(db: &Database, on_delete: ReferentialAction) -> DatabaseResult<()> {
    db.define_table(customers_schema())?;
    db.define_table(orders_schema(on_delete))?;

    let txn = db.begin()?;
    for (id, name) in [(1, "Alice"), (2, "Bob"), (3, "Charlie")] {
        db.insert(txn, "customers", vec![Value::integer(id), Value::text(name)])?;
    }
    for (order, customer, product) in [(101, 1, "Laptop"), (102, 2, "Keyboard")] {
        db.insert(
            txn,
            "orders",
            vec![
                Value::integer(order),
                Value::integer(customer),
                Value::text(product),
            ],
        )?;
    }
    db.commit(txn)?;
    Ok(())
}

/// Defines and fills Employees {(1, Alice, NULL), (2, Bob, 1),
/// (3, Charlie, 1)}, where `manager_id` references `employee_id`.
pub fn employees(db: &Database) -> DatabaseResult<()> {
    db.define_table(
        TableSchema::new("employees")
            .column(ColumnDef::new("employee_id", DataType::Integer))
            .column(ColumnDef::new("name", DataType::Text))
            .column(ColumnDef::new("manager_id", DataType::Integer).nullable())
            .primary_key(["employee_id"])
            .foreign_key(ForeignKeyDef::new(
                ["manager_id"],
                "employees",
                ["employee_id"],
            )),
    )?;

    let txn = db.begin()?;
    for (id, name, manager) in [(1, "Alice", None), (2, "Bob", Some(1)), (3, "Charlie", Some(1))] {
        db.insert(
            txn,
            "employees",
            vec![
                Value::integer(id),
                Value::text(name),
                Value::from(manager.map(i64::from)),
            ],
        )?;
    }
    db.commit(txn)?;
    Ok(())
}
