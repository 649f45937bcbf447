//! End-to-end database benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use tessera_bench::utils::{bench_db, generate_rows, populate_customers_orders, users_schema};
use tessera_db::{Database, EngineConfig, JoinKind, JoinPredicate, Predicate, TableRef, Value};

fn bench_insert_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("database/insert");

    for size in [100, 1000, 10000] {
        let rows = generate_rows(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("single_txn", size), &rows, |b, rows| {
            b.iter_batched(
                || {
                    let db = bench_db();
                    db.define_table(users_schema()).unwrap();
                    db
                },
                |db| {
                    let txn = db.begin().unwrap();
                    for row in rows {
                        db.insert(txn, "users", row.clone()).unwrap();
                    }
                    db.commit(txn).unwrap();
                    black_box(db)
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }

    let rows = generate_rows(100);
    group.throughput(Throughput::Elements(100));
    group.bench_function("txn_per_row", |b| {
        b.iter_batched(
            || {
                let db = bench_db();
                db.define_table(users_schema()).unwrap();
                db
            },
            |db| {
                for row in &rows {
                    let txn = db.begin().unwrap();
                    db.insert(txn, "users", row.clone()).unwrap();
                    db.commit(txn).unwrap();
                }
                black_box(db)
            },
            criterion::BatchSize::LargeInput,
        );
    });

    group.finish();
}

fn loaded_users(size: usize) -> Database {
    let db = bench_db();
    db.define_table(users_schema()).unwrap();
    let txn = db.begin().unwrap();
    for row in generate_rows(size) {
        db.insert(txn, "users", row).unwrap();
    }
    db.commit(txn).unwrap();
    db
}

fn bench_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("database/select");
    let size = 10000;
    let db = loaded_users(size);

    group.bench_function("primary_key_lookup", |b| {
        let mut key = 0i64;
        b.iter(|| {
            key = key % size as i64 + 1;
            let txn = db.begin().unwrap();
            let count = db
                .select(txn, "users", &Predicate::eq("id", Value::integer(key)), None)
                .unwrap()
                .count();
            db.commit(txn).unwrap();
            black_box(count)
        });
    });

    group.bench_function("primary_key_range", |b| {
        b.iter(|| {
            let txn = db.begin().unwrap();
            let predicate = Predicate::gt_eq("id", Value::integer(100))
                .and(Predicate::lt("id", Value::integer(200)));
            let count = db.select(txn, "users", &predicate, None).unwrap().count();
            db.commit(txn).unwrap();
            black_box(count)
        });
    });

    group.throughput(Throughput::Elements(size as u64));
    group.bench_function("full_scan_filter", |b| {
        b.iter(|| {
            let txn = db.begin().unwrap();
            let count = db
                .select(
                    txn,
                    "users",
                    &Predicate::gt("age", Value::integer(50)),
                    Some(&["id", "name"]),
                )
                .unwrap()
                .count();
            db.commit(txn).unwrap();
            black_box(count)
        });
    });

    group.finish();
}

fn bench_join(c: &mut Criterion) {
    let mut group = c.benchmark_group("database/join");
    group.sample_size(20);

    for (customers, orders) in [(100, 1000), (1000, 10000)] {
        let db = bench_db();
        populate_customers_orders(&db, customers, orders);
        let left = TableRef::new("customers").with_alias("c");
        let right = TableRef::new("orders").with_alias("o");
        let predicate = JoinPredicate::eq("id", "customer_id");

        for kind in [JoinKind::Inner, JoinKind::Left, JoinKind::Full] {
            group.bench_with_input(
                BenchmarkId::new(kind.to_string(), orders),
                &predicate,
                |b, predicate| {
                    b.iter(|| {
                        let txn = db.begin().unwrap();
                        let count = db.join(txn, kind, &left, &right, predicate).unwrap().count();
                        db.commit(txn).unwrap();
                        black_box(count)
                    });
                },
            );
        }
    }

    group.finish();
}

fn bench_recovery(c: &mut Criterion) {
    let mut group = c.benchmark_group("database/recovery");
    group.sample_size(10);

    for size in [1000, 10000] {
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("replay_log", size), &size, |b, &size| {
            let tmp = tempfile::TempDir::new().unwrap();
            let config = EngineConfig::with_path(tmp.path()).with_checkpoint_interval(0);
            {
                let db = Database::open(config.clone()).unwrap();
                db.define_table(users_schema()).unwrap();
                let txn = db.begin().unwrap();
                for row in generate_rows(size) {
                    db.insert(txn, "users", row).unwrap();
                }
                db.commit(txn).unwrap();
            }
            b.iter(|| black_box(Database::open(config.clone()).unwrap()));
        });

        group.bench_with_input(BenchmarkId::new("checkpoint", size), &size, |b, &size| {
            let db = loaded_users(size);
            b.iter(|| black_box(db.checkpoint().unwrap()));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_insert_commit,
    bench_select,
    bench_join,
    bench_recovery
);
criterion_main!(benches);
