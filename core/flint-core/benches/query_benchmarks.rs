// 쿼리 실행 벤치마크
//
// Section 1: 계획 수립 (parse → plan → optimize)
// Section 2: 필터 / 집계
// Section 3: Hash Join vs Sort-Merge Join

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use flint_core::{SessionConfig, SessionContext};

use arrow::array::{Int32Array, Int64Array, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use std::sync::Arc;

fn make_batches(rows: usize, batch_rows: usize) -> Vec<RecordBatch> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int32, false),
        Field::new("group_id", DataType::Int32, false),
        Field::new("amount", DataType::Int64, false),
        Field::new("label", DataType::Utf8, false),
    ]));
    (0..rows)
        .step_by(batch_rows)
        .map(|start| {
            let end = (start + batch_rows).min(rows);
            let ids: Vec<i32> = (start as i32..end as i32).collect();
            RecordBatch::try_new(
                Arc::clone(&schema),
                vec![
                    Arc::new(Int32Array::from_iter_values(ids.iter().copied())),
                    Arc::new(Int32Array::from_iter_values(ids.iter().map(|i| i % 100))),
                    Arc::new(Int64Array::from_iter_values(ids.iter().map(|i| i64::from(*i) * 3))),
                    Arc::new(StringArray::from_iter_values(
                        ids.iter().map(|i| format!("label-{}", i % 17)),
                    )),
                ],
            )
            .unwrap()
        })
        .collect()
}

fn session(config: SessionConfig, rows: usize) -> SessionContext {
    let ctx = SessionContext::with_config(config).unwrap();
    ctx.register_batches("facts", make_batches(rows, 8192))
        .unwrap();
    ctx.register_batches("dims", make_batches(100, 100))
        .unwrap();
    ctx
}

// ═══════════════════════════════════════════════════════════════════════════
// Section 1: Planning
// ═══════════════════════════════════════════════════════════════════════════

fn bench_planning(c: &mut Criterion) {
    let ctx = session(SessionConfig::default(), 1_000);
    let sql = "SELECT f.label, sum(f.amount) AS total FROM facts f JOIN dims d ON f.group_id = d.id \
               WHERE f.amount > 100 AND 1 = 1 GROUP BY f.label ORDER BY total DESC LIMIT 10";
    c.bench_function("plan_join_aggregate", |b| {
        b.iter(|| black_box(ctx.sql(black_box(sql)).unwrap()))
    });
}

// ═══════════════════════════════════════════════════════════════════════════
// Section 2: Filter / Aggregate
// ═══════════════════════════════════════════════════════════════════════════

fn bench_filter_aggregate(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter_aggregate");
    for rows in [10_000usize, 100_000] {
        let ctx = session(SessionConfig::default(), rows);
        let filter = ctx
            .sql("SELECT id, amount FROM facts WHERE amount % 7 = 0")
            .unwrap();
        group.bench_with_input(BenchmarkId::new("filter", rows), &rows, |b, _| {
            b.iter(|| black_box(filter.collect().unwrap()))
        });

        let aggregate = ctx
            .sql("SELECT group_id, count(*), sum(amount), max(label) FROM facts GROUP BY group_id")
            .unwrap();
        group.bench_with_input(BenchmarkId::new("group_by", rows), &rows, |b, _| {
            b.iter(|| black_box(aggregate.collect().unwrap()))
        });

        let top_k = ctx
            .sql("SELECT id FROM facts ORDER BY amount DESC LIMIT 10")
            .unwrap();
        group.bench_with_input(BenchmarkId::new("top_k", rows), &rows, |b, _| {
            b.iter(|| black_box(top_k.collect().unwrap()))
        });
    }
    group.finish();
}

// ═══════════════════════════════════════════════════════════════════════════
// Section 3: Join strategies
// ═══════════════════════════════════════════════════════════════════════════

fn bench_joins(c: &mut Criterion) {
    let mut group = c.benchmark_group("join");
    let sql = "SELECT f.id, d.label FROM facts f JOIN dims d ON f.group_id = d.id";
    let strategies = [
        ("hash", SessionConfig::default()),
        ("sort_merge", SessionConfig::default().with_prefer_hash_join(false)),
    ];
    for (name, config) in strategies {
        let ctx = session(config, 50_000);
        let df = ctx.sql(sql).unwrap();
        group.bench_function(name, |b| b.iter(|| black_box(df.collect().unwrap())));
    }
    group.finish();
}

criterion_group!(benches, bench_planning, bench_filter_aggregate, bench_joins);
criterion_main!(benches);
