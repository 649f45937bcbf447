//! Row codec and ordered index benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use tessera_bench::utils::generate_rows;
use tessera_db::{RowId, Value};
use tessera_sql::storage::{OrderedIndex, RowCodec};

fn bench_row_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("storage/row_codec");
    let rows = generate_rows(1000);
    let encoded: Vec<_> = rows.iter().map(|r| RowCodec::encode(r)).collect();

    group.throughput(Throughput::Elements(rows.len() as u64));
    group.bench_function("encode", |b| {
        b.iter(|| {
            for row in &rows {
                black_box(RowCodec::encode(row));
            }
        });
    });
    group.bench_function("decode", |b| {
        b.iter(|| {
            for image in &encoded {
                black_box(RowCodec::decode(image).unwrap());
            }
        });
    });

    group.finish();
}

fn bench_ordered_index(c: &mut Criterion) {
    let mut group = c.benchmark_group("storage/index");

    for size in [1000, 10000, 100000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("insert", size), &size, |b, &size| {
            b.iter(|| {
                let mut index = OrderedIndex::new(vec![0]);
                for i in 0..size as u64 {
                    index.insert(vec![Value::integer(i as i64)], RowId::new(i + 1));
                }
                black_box(index.len())
            });
        });

        let mut index = OrderedIndex::new(vec![0]);
        for i in 0..size as u64 {
            index.insert(vec![Value::integer(i as i64)], RowId::new(i + 1));
        }
        group.bench_with_input(BenchmarkId::new("point_get", size), &index, |b, index| {
            let mut key = 0i64;
            b.iter(|| {
                key = (key + 7919) % size as i64;
                black_box(index.get(&[Value::integer(key)]))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_row_codec, bench_ordered_index);
criterion_main!(benches);
