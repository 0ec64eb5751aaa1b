use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use livepivot::*;

fn trade_row(id: i64, desk: &str, qty: i64, px: f64) -> Row {
    [
        ("id".to_string(), ColumnValue::Integer(id)),
        ("desk".to_string(), ColumnValue::from(desk)),
        ("qty".to_string(), ColumnValue::Integer(qty)),
        ("px".to_string(), ColumnValue::Float(px)),
    ]
    .into_iter()
    .collect()
}

fn trades(size: i64) -> Vec<Row> {
    let desks = ["fx", "rates", "credit", "equities"];
    (0..size)
        .map(|i| trade_row(i, desks[(i % 4) as usize], i % 50, i as f64 * 0.25))
        .collect()
}

fn trades_table(hint: StorageHint) -> Table {
    let schema = Schema::new([
        ("id", ColumnType::Integer),
        ("desk", ColumnType::String),
        ("qty", ColumnType::Integer),
        ("px", ColumnType::Float),
    ]);
    Table::new(schema, TableOptions::new().index("id").storage(hint)).unwrap()
}

fn pivot_config() -> ViewConfig {
    ViewConfig::new()
        .group_by(["desk"])
        .columns(["qty", "px"])
        .aggregate("px", Aggregate::Avg)
        .sort(SortSpec::desc("qty"))
}

fn bench_sequence_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequence_append");

    for size in [100, 1000, 10000].iter() {
        group.bench_with_input(BenchmarkId::new("array", size), size, |b, &size| {
            b.iter(|| {
                let mut seq = ArraySequence::<i64>::new();
                for i in 0..size {
                    seq.append(black_box(i));
                }
            });
        });
        group.bench_with_input(BenchmarkId::new("chunked", size), size, |b, &size| {
            b.iter(|| {
                let mut seq = ChunkedSequence::<i64>::new();
                for i in 0..size {
                    seq.append(black_box(i));
                }
            });
        });
    }
    group.finish();
}

fn bench_update_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("update_throughput");

    for size in [1000, 10000].iter() {
        for hint in [StorageHint::FastReads, StorageHint::FastUpdates] {
            group.bench_with_input(BenchmarkId::new(hint.as_str(), size), size, |b, &size| {
                b.iter(|| {
                    let table = trades_table(hint);
                    table.update(black_box(trades(size)), UpdateOptions::default()).unwrap();
                    table
                });
            });
        }
    }
    group.finish();
}

fn bench_upsert_with_views(c: &mut Criterion) {
    let mut group = c.benchmark_group("upsert_with_views");

    for size in [1000, 10000].iter() {
        let table = trades_table(StorageHint::FastReads);
        table.update(trades(*size), UpdateOptions::default()).unwrap();
        let _flat = table.view(ViewConfig::new().sort(SortSpec::asc("px"))).unwrap();
        let _pivot = table.view(pivot_config()).unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let mut i = 0;
            b.iter(|| {
                i = (i + 7) % size;
                let row = trade_row(i, "fx", i % 13, black_box(i as f64));
                table.update(vec![row], UpdateOptions::default()).unwrap();
            });
        });
    }
    group.finish();
}

fn bench_pivot_rebuild_vs_incremental(c: &mut Criterion) {
    let mut group = c.benchmark_group("pivot_rebuild_vs_incremental");

    for size in [1000, 10000].iter() {
        let table = trades_table(StorageHint::FastReads);
        table.update(trades(*size), UpdateOptions::default()).unwrap();
        let view = table.view(pivot_config()).unwrap();

        group.bench_with_input(BenchmarkId::new("rebuild", size), size, |b, _| {
            b.iter(|| {
                let fresh = table.view(pivot_config()).unwrap();
                let out = fresh.to_columns(Window::all()).unwrap();
                fresh.delete().unwrap();
                out
            });
        });
        group.bench_with_input(BenchmarkId::new("incremental", size), size, |b, &size| {
            let mut i = 0;
            b.iter(|| {
                i = (i + 11) % size;
                let row = trade_row(i, "rates", black_box(i % 17), i as f64);
                table.update(vec![row], UpdateOptions::default()).unwrap();
                view.to_columns(Window::all()).unwrap()
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_sequence_append,
    bench_update_throughput,
    bench_upsert_with_views,
    bench_pivot_rebuild_vs_incremental
);
criterion_main!(benches);
