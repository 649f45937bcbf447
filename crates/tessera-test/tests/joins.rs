//! Join semantics: the Customers/Orders and Employees examples and the
//! algebraic laws of inner, left, right and full joins.

use std::collections::HashSet;

use tessera_db::{
    ColumnDef, CompareOp, DataType, Database, DatabaseError, JoinKind, JoinPredicate,
    ReferentialAction, TableRef, TableSchema, TxnId, Value,
};
use tessera_test::{customers_orders, employees, memory_db, values};

fn join(
    db: &Database,
    txn: TxnId,
    kind: JoinKind,
    left: &str,
    right: &str,
    predicate: &JoinPredicate,
) -> Vec<Vec<Value>> {
    values(
        db.join(txn, kind, &TableRef::new(left), &TableRef::new(right), predicate)
            .unwrap(),
    )
}

#[test]
fn test_customers_orders_left_join() {
    let db = memory_db();
    customers_orders(&db, ReferentialAction::Restrict).unwrap();
    let txn = db.begin().unwrap();

    let stream = db
        .join(
            txn,
            JoinKind::Left,
            &TableRef::new("customers"),
            &TableRef::new("orders"),
            &JoinPredicate::eq("id", "customer_id"),
        )
        .unwrap();
    assert_eq!(
        stream.columns(),
        &[
            "customers.id",
            "customers.name",
            "orders.order_id",
            "orders.customer_id",
            "orders.product"
        ]
        .map(String::from)
    );

    let rows = values(stream);
    assert_eq!(
        rows,
        vec![
            vec![
                Value::integer(1),
                Value::text("Alice"),
                Value::integer(101),
                Value::integer(1),
                Value::text("Laptop"),
            ],
            vec![
                Value::integer(2),
                Value::text("Bob"),
                Value::integer(102),
                Value::integer(2),
                Value::text("Keyboard"),
            ],
            vec![
                Value::integer(3),
                Value::text("Charlie"),
                Value::Null,
                Value::Null,
                Value::Null,
            ],
        ]
    );
    db.commit(txn).unwrap();
}

#[test]
fn test_employees_self_join() {
    let db = memory_db();
    employees(&db).unwrap();
    let txn = db.begin().unwrap();

    let stream = db
        .join(
            txn,
            JoinKind::SelfJoin,
            &TableRef::new("employees").with_alias("e"),
            &TableRef::new("employees").with_alias("m"),
            &JoinPredicate::eq("manager_id", "employee_id"),
        )
        .unwrap();
    let name = stream.column_index("e.name").unwrap();
    let manager = stream.column_index("m.name").unwrap();

    let pairs: Vec<(Value, Value)> = stream
        .map(|row| (row.values()[name].clone(), row.values()[manager].clone()))
        .collect();
    assert_eq!(
        pairs,
        vec![
            (Value::text("Bob"), Value::text("Alice")),
            (Value::text("Charlie"), Value::text("Alice")),
        ]
    );

    // Without distinct aliases the columns would be ambiguous
    let err = db
        .join(
            txn,
            JoinKind::SelfJoin,
            &TableRef::new("employees"),
            &TableRef::new("employees"),
            &JoinPredicate::eq("manager_id", "employee_id"),
        )
        .unwrap_err();
    assert!(matches!(err, DatabaseError::InvalidJoin(_)));
}

#[test]
fn test_self_left_join_keeps_top_manager() {
    let db = memory_db();
    employees(&db).unwrap();
    let txn = db.begin().unwrap();

    let rows = values(
        db.join(
            txn,
            JoinKind::Left,
            &TableRef::new("employees").with_alias("e"),
            &TableRef::new("employees").with_alias("m"),
            &JoinPredicate::eq("manager_id", "employee_id"),
        )
        .unwrap(),
    );
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0][1], Value::text("Alice"));
    assert_eq!(&rows[0][3..], &[Value::Null, Value::Null, Value::Null]);
}

/// Two tables with overlapping, missing and null keys.
fn join_laws_db() -> Database {
    let db = memory_db();
    db.define_table(
        TableSchema::new("a")
            .column(ColumnDef::new("id", DataType::Integer))
            .column(ColumnDef::new("k", DataType::Integer).nullable())
            .primary_key(["id"]),
    )
    .unwrap();
    db.define_table(
        TableSchema::new("b")
            .column(ColumnDef::new("id", DataType::Integer))
            .column(ColumnDef::new("k", DataType::Integer).nullable())
            .column(ColumnDef::new("tag", DataType::Text))
            .primary_key(["id"]),
    )
    .unwrap();

    let txn = db.begin().unwrap();
    for (id, k) in [(1, Some(1)), (2, Some(2)), (3, Some(2)), (4, Some(7)), (5, None)] {
        db.insert(txn, "a", vec![Value::integer(id), Value::from(k.map(i64::from))])
            .unwrap();
    }
    for (id, k, tag) in [
        (10, Some(2), "x"),
        (11, Some(2), "y"),
        (12, Some(1), "z"),
        (13, Some(9), "w"),
        (14, None, "n"),
    ] {
        db.insert(
            txn,
            "b",
            vec![Value::integer(id), Value::from(k.map(i64::from)), Value::text(tag)],
        )
        .unwrap();
    }
    db.commit(txn).unwrap();
    db
}

fn scan(db: &Database, txn: TxnId, table: &str) -> Vec<Vec<Value>> {
    values(
        db.select(txn, table, &tessera_db::Predicate::True, None)
            .unwrap(),
    )
}

#[test]
fn test_inner_join_projection_recovers_matched_subset() {
    let db = join_laws_db();
    let txn = db.begin().unwrap();
    let a = scan(&db, txn, "a");
    let b = scan(&db, txn, "b");

    for predicate in [
        JoinPredicate::eq("k", "k"),
        JoinPredicate::compare("k", CompareOp::Lt, "k"),
        JoinPredicate::or(vec![
            JoinPredicate::eq("k", "k"),
            JoinPredicate::eq("id", "k"),
        ]),
    ] {
        let joined: HashSet<(Vec<Value>, Vec<Value>)> =
            join(&db, txn, JoinKind::Inner, "a", "b", &predicate)
                .into_iter()
                .map(|row| (row[..2].to_vec(), row[2..].to_vec()))
                .collect();

        let expected: HashSet<(Vec<Value>, Vec<Value>)> = a
            .iter()
            .flat_map(|l| b.iter().map(move |r| (l.clone(), r.clone())))
            .filter(|(l, r)| brute_force(&predicate, l, r))
            .collect();
        assert_eq!(joined, expected, "{:?}", predicate);
    }
}

/// Evaluates the predicates used above directly on (id, k) columns.
fn brute_force(predicate: &JoinPredicate, l: &[Value], r: &[Value]) -> bool {
    let cmp = |x: &Value, y: &Value| x.compare(y);
    match predicate {
        JoinPredicate::Eq { .. } => cmp(&l[1], &r[1]) == Some(std::cmp::Ordering::Equal),
        JoinPredicate::Compare { .. } => cmp(&l[1], &r[1]) == Some(std::cmp::Ordering::Less),
        JoinPredicate::Or(_) => {
            cmp(&l[1], &r[1]) == Some(std::cmp::Ordering::Equal)
                || cmp(&l[0], &r[1]) == Some(std::cmp::Ordering::Equal)
        }
        JoinPredicate::And(_) => unreachable!(),
    }
}

#[test]
fn test_left_join_row_count_law() {
    let db = join_laws_db();
    let txn = db.begin().unwrap();
    let predicate = JoinPredicate::eq("k", "k");

    let a = scan(&db, txn, "a");
    let left = join(&db, txn, JoinKind::Left, "a", "b", &predicate);
    let inner = join(&db, txn, JoinKind::Inner, "a", "b", &predicate);
    assert!(left.len() >= a.len());

    let matched: HashSet<Vec<Value>> = inner.iter().map(|row| row[..2].to_vec()).collect();
    let unmatched = a.iter().filter(|row| !matched.contains(*row)).count();
    assert_eq!(left.len(), inner.len() + unmatched);
    assert!(unmatched > 0);
    assert!(left.len() > a.len());

    // Equality holds when every left row matches exactly once
    let exact = values(
        db.join(
            txn,
            JoinKind::Left,
            &TableRef::new("a").with_alias("l"),
            &TableRef::new("a").with_alias("r"),
            &JoinPredicate::eq("id", "id"),
        )
        .unwrap(),
    );
    assert_eq!(exact.len(), a.len());
}

#[test]
fn test_left_join_preserves_left_order() {
    let db = join_laws_db();
    let txn = db.begin().unwrap();
    let left = join(&db, txn, JoinKind::Left, "a", "b", &JoinPredicate::eq("k", "k"));
    let ids: Vec<Value> = left.iter().map(|row| row[0].clone()).collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);

    // Matches for one left row follow right scan order
    let for_two: Vec<Value> = left
        .iter()
        .filter(|row| row[0] == Value::integer(2))
        .map(|row| row[2].clone())
        .collect();
    assert_eq!(for_two, vec![Value::integer(10), Value::integer(11)]);
}

#[test]
fn test_full_join_is_union_of_left_and_right() {
    let db = join_laws_db();
    let txn = db.begin().unwrap();

    for predicate in [
        JoinPredicate::eq("k", "k"),
        JoinPredicate::compare("k", CompareOp::GtEq, "k"),
    ] {
        let full = join(&db, txn, JoinKind::Full, "a", "b", &predicate);
        let left = join(&db, txn, JoinKind::Left, "a", "b", &predicate);
        let right = join(&db, txn, JoinKind::Right, "a", "b", &predicate);

        let full_set: HashSet<Vec<Value>> = full.iter().cloned().collect();
        let union: HashSet<Vec<Value>> = left.into_iter().chain(right).collect();
        assert_eq!(full.len(), full_set.len(), "duplicate rows in full join");
        assert_eq!(full_set, union);
    }
}

#[test]
fn test_right_join_columns_stay_in_left_right_order() {
    let db = join_laws_db();
    let txn = db.begin().unwrap();
    let right = join(&db, txn, JoinKind::Right, "a", "b", &JoinPredicate::eq("k", "k"));

    // b has 5 rows; 13 and 14 match nothing
    let unmatched: Vec<&Vec<Value>> = right.iter().filter(|row| row[0].is_null()).collect();
    assert_eq!(unmatched.len(), 2);
    for row in unmatched {
        assert_eq!(row.len(), 5);
        assert!(row[1].is_null());
        assert!(!row[2].is_null());
    }
}

#[test]
fn test_join_sees_own_uncommitted_rows() {
    let db = memory_db();
    customers_orders(&db, ReferentialAction::Restrict).unwrap();

    let txn = db.begin().unwrap();
    db.insert(
        txn,
        "orders",
        vec![Value::integer(103), Value::integer(3), Value::text("Mouse")],
    )
    .unwrap();
    let inner = join(
        &db,
        txn,
        JoinKind::Inner,
        "customers",
        "orders",
        &JoinPredicate::eq("id", "customer_id"),
    );
    assert_eq!(inner.len(), 3);

    let other = db.begin().unwrap();
    let inner = join(
        &db,
        other,
        JoinKind::Inner,
        "customers",
        "orders",
        &JoinPredicate::eq("id", "customer_id"),
    );
    assert_eq!(inner.len(), 2);
}

#[test]
fn test_join_predicate_type_mismatch() {
    let db = memory_db();
    customers_orders(&db, ReferentialAction::Restrict).unwrap();
    let txn = db.begin().unwrap();
    let err = db
        .join(
            txn,
            JoinKind::Inner,
            &TableRef::new("customers"),
            &TableRef::new("orders"),
            &JoinPredicate::eq("name", "customer_id"),
        )
        .unwrap_err();
    assert!(matches!(err, DatabaseError::InvalidJoin(_)));
}
