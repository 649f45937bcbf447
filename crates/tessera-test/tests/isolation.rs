//! Isolation levels, write locks and serializable validation.

use std::sync::{Arc, Barrier};
use std::thread;

use tessera_db::{
    Database, DatabaseError, EngineConfig, IsolationLevel, Predicate, ReferentialAction, RowId,
    TransactionState, TxnId, Value,
};
use tessera_test::{customers_orders, init_tracing, memory_db, table_contents, values};

fn name_of(db: &Database, txn: TxnId, id: i64) -> Value {
    let rows = values(
        db.select(txn, "customers", &Predicate::eq("id", id), Some(&["name"]))
            .unwrap(),
    );
    assert_eq!(rows.len(), 1);
    rows[0][0].clone()
}

fn bob(db: &Database) -> RowId {
    table_contents(db, "customers")[1].0
}

fn rename(db: &Database, txn: TxnId, row: RowId, name: &str) -> Result<(), DatabaseError> {
    db.update(txn, "customers", row, vec![Value::integer(2), Value::text(name)])
}

fn db_with_timeout(ms: u64, on_delete: ReferentialAction) -> Arc<Database> {
    init_tracing();
    let db = Database::open(EngineConfig::new().with_lock_timeout_ms(ms)).unwrap();
    customers_orders(&db, on_delete).unwrap();
    Arc::new(db)
}

#[test]
fn test_repeatable_read_rereads_same_value() {
    let db = memory_db();
    customers_orders(&db, ReferentialAction::Restrict).unwrap();
    let row = bob(&db);

    let t1 = db.begin_transaction(IsolationLevel::RepeatableRead).unwrap();
    assert_eq!(name_of(&db, t1, 2), Value::text("Bob"));

    let t2 = db.begin().unwrap();
    rename(&db, t2, row, "Robert").unwrap();
    db.commit(t2).unwrap();

    assert_eq!(name_of(&db, t1, 2), Value::text("Bob"));
    db.commit(t1).unwrap();

    let t3 = db.begin().unwrap();
    assert_eq!(name_of(&db, t3, 2), Value::text("Robert"));
}

#[test]
fn test_read_committed_sees_new_commits() {
    let db = memory_db();
    customers_orders(&db, ReferentialAction::Restrict).unwrap();
    let row = bob(&db);

    let t1 = db.begin_transaction(IsolationLevel::ReadCommitted).unwrap();
    assert_eq!(name_of(&db, t1, 2), Value::text("Bob"));

    let t2 = db.begin().unwrap();
    rename(&db, t2, row, "Robert").unwrap();
    assert_eq!(name_of(&db, t1, 2), Value::text("Bob"));
    db.commit(t2).unwrap();

    assert_eq!(name_of(&db, t1, 2), Value::text("Robert"));
}

#[test]
fn test_read_uncommitted_sees_pending_writes() {
    let db = memory_db();
    customers_orders(&db, ReferentialAction::Restrict).unwrap();
    let row = bob(&db);

    let writer = db.begin().unwrap();
    rename(&db, writer, row, "Robert").unwrap();

    let dirty = db.begin_transaction(IsolationLevel::ReadUncommitted).unwrap();
    assert_eq!(name_of(&db, dirty, 2), Value::text("Robert"));

    db.rollback(writer).unwrap();
    assert_eq!(name_of(&db, dirty, 2), Value::text("Bob"));
}

#[test]
fn test_own_writes_visible() {
    let db = memory_db();
    customers_orders(&db, ReferentialAction::Restrict).unwrap();
    let row = bob(&db);

    let txn = db.begin_transaction(IsolationLevel::Serializable).unwrap();
    rename(&db, txn, row, "Robert").unwrap();
    assert_eq!(name_of(&db, txn, 2), Value::text("Robert"));
    db.delete(txn, "customers", table_contents(&db, "customers")[2].0)
        .unwrap();
    assert_eq!(
        values(db.select(txn, "customers", &Predicate::True, None).unwrap()).len(),
        2
    );
    db.commit(txn).unwrap();
}

#[test]
fn test_serializable_read_write_conflict() {
    let db = memory_db();
    customers_orders(&db, ReferentialAction::Restrict).unwrap();
    let row = bob(&db);

    let t1 = db.begin_transaction(IsolationLevel::Serializable).unwrap();
    let t2 = db.begin_transaction(IsolationLevel::Serializable).unwrap();
    let seen1 = name_of(&db, t1, 2);
    let seen2 = name_of(&db, t2, 2);

    rename(&db, t1, row, &format!("{}-1", seen1)).unwrap();
    db.commit(t1).unwrap();

    rename(&db, t2, row, &format!("{}-2", seen2)).unwrap();
    let err = db.commit(t2).unwrap_err();
    assert!(matches!(err, DatabaseError::SerializationFailure(_)));
    assert!(err.is_retryable());
    assert!(err.aborts_transaction());
    assert_eq!(db.transaction_state(t2).unwrap(), TransactionState::Aborted);

    let t3 = db.begin().unwrap();
    assert_eq!(name_of(&db, t3, 2), Value::text("Bob-1"));
    assert_eq!(db.stats().serialization_failures, 1);
}

#[test]
fn test_serializable_concurrent_exactly_one_commits() {
    let db = db_with_timeout(5_000, ReferentialAction::Restrict);
    let row = bob(&db);
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = (0..2)
        .map(|i| {
            let db = Arc::clone(&db);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let txn = db.begin_transaction(IsolationLevel::Serializable).unwrap();
                let seen = name_of(&db, txn, 2);
                barrier.wait();
                let result = rename(&db, txn, row, &format!("{}-{}", seen, i))
                    .and_then(|()| db.commit(txn).map(|_| ()));
                if result.is_err() {
                    db.rollback(txn).unwrap();
                }
                result
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let committed = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(committed, 1, "{:?}", results);
    assert!(results.iter().any(|r| matches!(
        r,
        Err(DatabaseError::SerializationFailure(_))
    )));
}

#[test]
fn test_serializable_scan_conflict() {
    let db = memory_db();
    customers_orders(&db, ReferentialAction::Restrict).unwrap();

    // Write skew: each counts customers and inserts based on the count
    let t1 = db.begin_transaction(IsolationLevel::Serializable).unwrap();
    let t2 = db.begin_transaction(IsolationLevel::Serializable).unwrap();
    let n1 = values(db.select(t1, "customers", &Predicate::True, None).unwrap()).len() as i64;
    let n2 = values(db.select(t2, "customers", &Predicate::True, None).unwrap()).len() as i64;

    db.insert(t1, "customers", vec![Value::integer(10 + n1), Value::text("x")])
        .unwrap();
    db.insert(t2, "customers", vec![Value::integer(20 + n2), Value::text("y")])
        .unwrap();
    db.commit(t1).unwrap();
    assert!(matches!(
        db.commit(t2),
        Err(DatabaseError::SerializationFailure(_))
    ));
}

#[test]
fn test_lock_timeout_keeps_transaction_active() {
    let db = db_with_timeout(50, ReferentialAction::Restrict);
    let row = bob(&db);

    let t1 = db.begin().unwrap();
    rename(&db, t1, row, "Robert").unwrap();

    let t2 = db.begin_transaction(IsolationLevel::ReadCommitted).unwrap();
    let err = rename(&db, t2, row, "Bobby").unwrap_err();
    assert!(matches!(err, DatabaseError::LockTimeout(_)));
    assert!(err.is_retryable());
    assert_eq!(db.transaction_state(t2).unwrap(), TransactionState::Active);

    db.commit(t1).unwrap();
    rename(&db, t2, row, "Bobby").unwrap();
    db.commit(t2).unwrap();
    assert!(db.stats().lock_timeouts >= 1);
}

#[test]
fn test_cascade_waits_for_lock_then_replans() {
    let db = db_with_timeout(5_000, ReferentialAction::Cascade);
    let rows = table_contents(&db, "customers");
    let (alice, _) = rows[0].clone();

    let t1 = db.begin().unwrap();
    db.delete(t1, "orders", table_contents(&db, "orders")[0].0)
        .unwrap();

    let waiter = {
        let db = Arc::clone(&db);
        thread::spawn(move || {
            let t2 = db.begin_transaction(IsolationLevel::ReadCommitted).unwrap();
            // The cascade blocks on Alice's order until t1 commits, then
            // finds it gone
            let result = db.delete(t2, "customers", alice);
            let result = result.and_then(|()| db.commit(t2).map(|_| ()));
            if result.is_err() {
                db.rollback(t2).unwrap();
            }
            result
        })
    };

    thread::sleep(std::time::Duration::from_millis(50));
    db.commit(t1).unwrap();
    waiter.join().unwrap().unwrap();
    assert_eq!(table_contents(&db, "customers").len(), 2);
    assert_eq!(table_contents(&db, "orders").len(), 1);
}

#[test]
fn test_deadlock_detected_and_survivor_commits() {
    let db = db_with_timeout(5_000, ReferentialAction::Restrict);
    let rows = table_contents(&db, "customers");
    let (alice, bob) = (rows[0].0, rows[1].0);
    let barrier = Arc::new(Barrier::new(2));

    let spawn = |first: RowId, second: RowId, ids: (i64, i64)| {
        let db = Arc::clone(&db);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            let txn = db.begin().unwrap();
            db.update(txn, "customers", first, vec![Value::integer(ids.0), Value::text("a")])
                .unwrap();
            barrier.wait();
            let result = db
                .update(txn, "customers", second, vec![Value::integer(ids.1), Value::text("b")])
                .and_then(|()| db.commit(txn).map(|_| ()));
            if result.is_err() {
                db.rollback(txn).unwrap();
            }
            result
        })
    };

    let h1 = spawn(alice, bob, (1, 2));
    let h2 = spawn(bob, alice, (2, 1));
    let results = [h1.join().unwrap(), h2.join().unwrap()];

    let deadlocks = results
        .iter()
        .filter(|r| matches!(r, Err(DatabaseError::Deadlock(_))))
        .count();
    assert_eq!(deadlocks, 1, "{:?}", results);
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(db.stats().deadlocks >= 1);
}

#[test]
fn test_operations_on_finished_transaction() {
    let db = memory_db();
    customers_orders(&db, ReferentialAction::Restrict).unwrap();
    let txn = db.begin().unwrap();
    db.rollback(txn).unwrap();

    assert!(matches!(
        db.select(txn, "customers", &Predicate::True, None),
        Err(DatabaseError::TransactionNotActive { .. })
    ));
    assert!(matches!(
        db.commit(txn),
        Err(DatabaseError::TransactionNotActive { .. })
    ));
    db.rollback(txn).unwrap();
}

#[test]
fn test_garbage_collection_respects_active_snapshots() {
    let db = memory_db();
    customers_orders(&db, ReferentialAction::Restrict).unwrap();
    let row = bob(&db);

    let reader = db.begin_transaction(IsolationLevel::RepeatableRead).unwrap();
    assert_eq!(name_of(&db, reader, 2), Value::text("Bob"));

    for name in ["B1", "B2", "B3"] {
        let txn = db.begin().unwrap();
        rename(&db, txn, row, name).unwrap();
        db.commit(txn).unwrap();
    }

    db.collect_garbage();
    assert_eq!(name_of(&db, reader, 2), Value::text("Bob"));
    db.commit(reader).unwrap();

    let report = db.collect_garbage();
    assert!(report.vacuum.versions >= 1);
    assert_eq!(table_contents(&db, "customers")[1].1[1], Value::text("B3"));
}
