//! Join algorithm benchmarks.
//!
//! Equality predicates run as a hash join; any other comparison falls back
//! to a nested loop.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use tessera_db::{ColumnDef, CompareOp, DataType, JoinKind, JoinPredicate, Row, Value};
use tessera_sql::executor::{execute_join, JoinInput};

fn columns() -> Vec<ColumnDef> {
    vec![
        ColumnDef::new("id", DataType::Integer),
        ColumnDef::new("key", DataType::Integer),
    ]
}

fn input(alias: &str, size: usize, keys: i64, seed: u64) -> JoinInput {
    let mut rng = StdRng::seed_from_u64(seed);
    let rows = (0..size as i64)
        .map(|i| Row::new(vec![Value::integer(i), Value::integer(rng.gen_range(0..keys))]))
        .collect();
    JoinInput::new(alias, vec!["id".into(), "key".into()], Arc::new(rows))
}

fn bench_join_algorithms(c: &mut Criterion) {
    let mut group = c.benchmark_group("executor/join");
    group.sample_size(20);
    let schema = columns();

    for size in [100, 1000] {
        let left = input("l", size, size as i64, 1);
        let right = input("r", size, size as i64, 2);

        let hash = JoinPredicate::eq("key", "key").bind(&schema, &schema).unwrap();
        let nested = JoinPredicate::and(vec![
            JoinPredicate::compare("key", CompareOp::LtEq, "key"),
            JoinPredicate::compare("key", CompareOp::GtEq, "key"),
        ])
        .bind(&schema, &schema)
        .unwrap();

        for (name, predicate) in [("hash", &hash), ("nested_loop", &nested)] {
            for kind in [JoinKind::Inner, JoinKind::Full] {
                group.bench_with_input(
                    BenchmarkId::new(format!("{name}/{kind}"), size),
                    predicate,
                    |b, predicate| {
                        b.iter(|| {
                            let stream = execute_join(kind, left.clone(), right.clone(), predicate);
                            black_box(stream.count())
                        });
                    },
                );
            }
        }
    }

    group.finish();
}

criterion_group!(benches, bench_join_algorithms);
criterion_main!(benches);
