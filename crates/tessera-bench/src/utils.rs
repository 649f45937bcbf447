//! Benchmark utilities and helpers.

use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use tessera_db::{
    ColumnDef, DataType, Database, EngineConfig, ForeignKeyDef, SyncPolicy, TableSchema, Value,
};

/// Generates a random alphanumeric string.
pub fn random_string(rng: &mut StdRng, len: usize) -> String {
    rng.sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Generates random rows of (id, name, age, balance).
pub fn generate_rows(count: usize) -> Vec<Vec<Value>> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..count as i64)
        .map(|i| {
            let name = random_string(&mut rng, 12);
            let age = rng.gen_range(18..80i64);
            let cents: i64 = rng.gen_range(0..1_000_000);
            vec![
                Value::integer(i + 1),
                Value::text(name),
                Value::integer(age),
                Value::decimal(&format!("{}.{:02}", cents / 100, cents % 100))
                    .unwrap_or(Value::Null),
            ]
        })
        .collect()
}

/// Schema matching [`generate_rows`].
pub fn users_schema() -> TableSchema {
    TableSchema::new("users")
        .column(ColumnDef::new("id", DataType::Integer))
        .column(ColumnDef::new("name", DataType::Text))
        .column(ColumnDef::new("age", DataType::Integer))
        .column(ColumnDef::new("balance", DataType::Decimal).nullable())
        .primary_key(["id"])
}

/// Opens an in-memory database that never syncs, so benchmarks measure
/// the engine rather than the log.
pub fn bench_db() -> Database {
    Database::open(
        EngineConfig::new()
            .with_sync_policy(SyncPolicy::Never)
            .with_checkpoint_interval(0),
    )
    .expect("open benchmark database")
}

/// Creates `customers(id, name)` with `customers` rows and `orders(id,
/// customer_id)` with `orders` rows spread randomly over the customers.
pub fn populate_customers_orders(db: &Database, customers: usize, orders: usize) {
    db.define_table(
        TableSchema::new("customers")
            .column(ColumnDef::new("id", DataType::Integer))
            .column(ColumnDef::new("name", DataType::Text))
            .primary_key(["id"]),
    )
    .expect("define customers");
    db.define_table(
        TableSchema::new("orders")
            .column(ColumnDef::new("id", DataType::Integer))
            .column(ColumnDef::new("customer_id", DataType::Integer))
            .primary_key(["id"])
            .foreign_key(ForeignKeyDef::new(["customer_id"], "customers", ["id"])),
    )
    .expect("define orders");

    let mut rng = StdRng::seed_from_u64(7);
    let txn = db.begin().expect("begin");
    for i in 0..customers as i64 {
        db.insert(
            txn,
            "customers",
            vec![Value::integer(i), Value::text(random_string(&mut rng, 8))],
        )
        .expect("insert customer");
    }
    for i in 0..orders as i64 {
        let customer = rng.gen_range(0..customers as i64);
        db.insert(
            txn,
            "orders",
            vec![Value::integer(i), Value::integer(customer)],
        )
        .expect("insert order");
    }
    db.commit(txn).expect("commit");
}
