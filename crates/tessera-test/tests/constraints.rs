//! Constraint enforcement through the `Database` API.

use tessera_db::{
    ColumnDef, ConstraintViolation, DataType, DatabaseError, ForeignKeyDef, Predicate,
    ReferentialAction, TableSchema, TransactionState, Value,
};
use tessera_test::{customers_orders, memory_db, table_contents, values};

#[test]
fn test_primary_key_violation_never_mutates_storage() {
    let db = memory_db();
    customers_orders(&db, ReferentialAction::Restrict).unwrap();
    let before = table_contents(&db, "customers");
    let chains = db.stats().row_chains;

    let txn = db.begin().unwrap();
    let err = db
        .insert(txn, "customers", vec![Value::integer(2), Value::text("Bobby")])
        .unwrap_err();
    assert!(matches!(
        err,
        DatabaseError::ConstraintViolation(ConstraintViolation::PrimaryKey { .. })
    ));
    assert!(err.is_constraint_violation());
    assert!(!err.aborts_transaction());

    // Visible to the failing transaction too
    let seen = values(db.select(txn, "customers", &Predicate::True, None).unwrap());
    assert_eq!(seen.len(), 3);
    assert_eq!(db.transaction_state(txn).unwrap(), TransactionState::Active);
    db.commit(txn).unwrap();

    assert_eq!(table_contents(&db, "customers"), before);
    assert_eq!(db.stats().row_chains, chains);
}

#[test]
fn test_update_into_existing_key_rejected() {
    let db = memory_db();
    customers_orders(&db, ReferentialAction::Restrict).unwrap();
    let (bob, _) = table_contents(&db, "customers")[1].clone();

    let txn = db.begin().unwrap();
    let err = db
        .update(txn, "customers", bob, vec![Value::integer(1), Value::text("Bob")])
        .unwrap_err();
    assert!(err.is_constraint_violation());

    // The transaction can go on
    db.update(txn, "customers", bob, vec![Value::integer(2), Value::text("Robert")])
        .unwrap();
    db.commit(txn).unwrap();
    assert_eq!(
        table_contents(&db, "customers")[1].1,
        vec![Value::integer(2), Value::text("Robert")]
    );
}

#[test]
fn test_unique_key_and_null() {
    let db = memory_db();
    db.define_table(
        TableSchema::new("users")
            .column(ColumnDef::new("id", DataType::Integer))
            .column(ColumnDef::new("email", DataType::Text).nullable())
            .primary_key(["id"])
            .unique(["email"]),
    )
    .unwrap();

    let txn = db.begin().unwrap();
    db.insert(txn, "users", vec![Value::integer(1), Value::text("a@x")])
        .unwrap();
    let err = db
        .insert(txn, "users", vec![Value::integer(2), Value::text("a@x")])
        .unwrap_err();
    assert!(matches!(
        err,
        DatabaseError::ConstraintViolation(ConstraintViolation::Unique { .. })
    ));

    // Nulls never collide
    db.insert(txn, "users", vec![Value::integer(3), Value::Null])
        .unwrap();
    db.insert(txn, "users", vec![Value::integer(4), Value::Null])
        .unwrap();
    db.commit(txn).unwrap();
    assert_eq!(table_contents(&db, "users").len(), 3);
}

#[test]
fn test_type_and_null_checks() {
    let db = memory_db();
    customers_orders(&db, ReferentialAction::Restrict).unwrap();
    let txn = db.begin().unwrap();

    let err = db
        .insert(txn, "customers", vec![Value::text("4"), Value::text("Dan")])
        .unwrap_err();
    assert!(matches!(
        err,
        DatabaseError::ConstraintViolation(ConstraintViolation::TypeMismatch { .. })
    ));

    let err = db
        .insert(txn, "customers", vec![Value::integer(4), Value::Null])
        .unwrap_err();
    assert!(matches!(
        err,
        DatabaseError::ConstraintViolation(ConstraintViolation::NotNull { .. })
    ));

    let err = db
        .insert(txn, "customers", vec![Value::integer(4)])
        .unwrap_err();
    assert!(matches!(
        err,
        DatabaseError::ConstraintViolation(ConstraintViolation::ColumnCount { .. })
    ));
}

#[test]
fn test_foreign_key_restrict() {
    let db = memory_db();
    customers_orders(&db, ReferentialAction::Restrict).unwrap();
    let customers = table_contents(&db, "customers");

    let txn = db.begin().unwrap();
    let err = db
        .insert(
            txn,
            "orders",
            vec![Value::integer(103), Value::integer(9), Value::text("Mouse")],
        )
        .unwrap_err();
    assert!(matches!(
        err,
        DatabaseError::ConstraintViolation(ConstraintViolation::ForeignKey { .. })
    ));

    let err = db.delete(txn, "customers", customers[0].0).unwrap_err();
    assert!(err.is_constraint_violation());

    // Charlie has no orders
    db.delete(txn, "customers", customers[2].0).unwrap();
    db.commit(txn).unwrap();
    assert_eq!(table_contents(&db, "customers").len(), 2);
    assert_eq!(table_contents(&db, "orders").len(), 2);
}

#[test]
fn test_foreign_key_cascade_delete_and_update() {
    let db = memory_db();
    customers_orders(&db, ReferentialAction::Cascade).unwrap();
    let customers = table_contents(&db, "customers");

    let txn = db.begin().unwrap();
    db.update(
        txn,
        "customers",
        customers[1].0,
        vec![Value::integer(20), Value::text("Bob")],
    )
    .unwrap();
    db.delete(txn, "customers", customers[0].0).unwrap();
    db.commit(txn).unwrap();

    let orders: Vec<Vec<Value>> = table_contents(&db, "orders")
        .into_iter()
        .map(|(_, values)| values)
        .collect();
    assert_eq!(
        orders,
        vec![vec![
            Value::integer(102),
            Value::integer(20),
            Value::text("Keyboard")
        ]]
    );
}

#[test]
fn test_foreign_key_set_null() {
    let db = memory_db();
    customers_orders(&db, ReferentialAction::SetNull).unwrap();
    let alice = table_contents(&db, "customers")[0].0;

    let txn = db.begin().unwrap();
    db.delete(txn, "customers", alice).unwrap();
    let orphans = values(
        db.select(txn, "orders", &Predicate::is_null("customer_id"), Some(&["order_id"]))
            .unwrap(),
    );
    assert_eq!(orphans, vec![vec![Value::integer(101)]]);
    db.commit(txn).unwrap();
}

#[test]
fn test_set_null_on_required_column_rejected_at_definition() {
    let db = memory_db();
    db.define_table(tessera_test::customers_schema()).unwrap();
    let err = db
        .define_table(
            TableSchema::new("orders")
                .column(ColumnDef::new("order_id", DataType::Integer))
                .column(ColumnDef::new("customer_id", DataType::Integer))
                .primary_key(["order_id"])
                .foreign_key(
                    ForeignKeyDef::new(["customer_id"], "customers", ["id"])
                        .on_delete(ReferentialAction::SetNull),
                ),
        )
        .unwrap_err();
    assert!(matches!(err, DatabaseError::Schema(_)));
    assert!(db.lookup_table("orders").is_err());
}

#[test]
fn test_cascade_chain_across_tables() {
    let db = memory_db();
    customers_orders(&db, ReferentialAction::Cascade).unwrap();
    db.define_table(
        TableSchema::new("shipments")
            .column(ColumnDef::new("id", DataType::Integer))
            .column(ColumnDef::new("order_id", DataType::Integer))
            .primary_key(["id"])
            .foreign_key(
                ForeignKeyDef::new(["order_id"], "orders", ["order_id"])
                    .on_delete(ReferentialAction::Cascade),
            ),
    )
    .unwrap();

    let txn = db.begin().unwrap();
    db.insert(txn, "shipments", vec![Value::integer(1), Value::integer(101)])
        .unwrap();
    db.insert(txn, "shipments", vec![Value::integer(2), Value::integer(102)])
        .unwrap();
    db.commit(txn).unwrap();

    let alice = table_contents(&db, "customers")[0].0;
    let txn = db.begin().unwrap();
    db.delete(txn, "customers", alice).unwrap();
    db.commit(txn).unwrap();

    assert_eq!(table_contents(&db, "orders").len(), 1);
    let shipments = table_contents(&db, "shipments");
    assert_eq!(shipments.len(), 1);
    assert_eq!(shipments[0].1[1], Value::integer(102));
}

#[test]
fn test_drop_table_rules() {
    let db = memory_db();
    customers_orders(&db, ReferentialAction::Restrict).unwrap();

    assert!(matches!(
        db.drop_table("customers", false),
        Err(DatabaseError::Schema(_))
    ));
    db.drop_table("customers", true).unwrap();
    assert!(db.lookup_table("orders").unwrap().foreign_keys.is_empty());
    assert!(matches!(
        db.drop_table("customers", false),
        Err(DatabaseError::UnknownTable(_))
    ));
}

#[test]
fn test_cascade_cycle_reported() {
    let db = memory_db();
    db.define_table(
        TableSchema::new("ring")
            .column(ColumnDef::new("id", DataType::Integer))
            .column(ColumnDef::new("next", DataType::Integer).nullable())
            .primary_key(["id"])
            .foreign_key(
                ForeignKeyDef::new(["next"], "ring", ["id"]).on_delete(ReferentialAction::Cascade),
            ),
    )
    .unwrap();

    // 1 -> 2 -> 3 -> 1
    let txn = db.begin().unwrap();
    let first = db
        .insert(txn, "ring", vec![Value::integer(1), Value::Null])
        .unwrap();
    db.insert(txn, "ring", vec![Value::integer(2), Value::integer(1)])
        .unwrap();
    db.insert(txn, "ring", vec![Value::integer(3), Value::integer(2)])
        .unwrap();
    db.update(txn, "ring", first, vec![Value::integer(1), Value::integer(3)])
        .unwrap();
    db.commit(txn).unwrap();
    let before = table_contents(&db, "ring");

    let txn = db.begin().unwrap();
    let err = db.delete(txn, "ring", first).unwrap_err();
    assert!(matches!(
        err,
        DatabaseError::ConstraintViolation(ConstraintViolation::CyclicCascade { .. })
    ));
    assert_eq!(db.transaction_state(txn).unwrap(), TransactionState::Active);

    // Breaking the ring lets the cascade run to its end
    db.update(txn, "ring", first, vec![Value::integer(1), Value::Null])
        .unwrap();
    db.delete(txn, "ring", first).unwrap();
    db.commit(txn).unwrap();

    assert_eq!(before.len(), 3);
    assert!(table_contents(&db, "ring").is_empty());
}
