// SQL 통합 테스트
//
// SessionContext → DataFrame → RecordBatch 종단 간 검증

use flint_core::{FlintError, FlintResult, SessionConfig, SessionContext};

use arrow::array::{Array, Float64Array, Int32Array, Int64Array, RecordBatch, StringArray};
use arrow::compute::concat_batches;
use arrow::datatypes::{DataType, Field, Schema};
use std::sync::Arc;

// ─── Helpers ────────────────────────────────────────────

fn table_t() -> RecordBatch {
    RecordBatch::try_new(
        Arc::new(Schema::new(vec![
            Field::new("a", DataType::Int32, false),
            Field::new("b", DataType::Int32, true),
        ])),
        vec![
            Arc::new(Int32Array::from(vec![1, 2, 3])),
            Arc::new(Int32Array::from(vec![10, 20, 30])),
        ],
    )
    .unwrap()
}

fn orders(ids: Vec<i32>, customers: Vec<Option<i32>>, amounts: Vec<i64>) -> RecordBatch {
    RecordBatch::try_new(
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int32, false),
            Field::new("customer", DataType::Int32, true),
            Field::new("amount", DataType::Int64, false),
        ])),
        vec![
            Arc::new(Int32Array::from(ids)),
            Arc::new(Int32Array::from(customers)),
            Arc::new(Int64Array::from(amounts)),
        ],
    )
    .unwrap()
}

fn customers() -> RecordBatch {
    RecordBatch::try_new(
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int32, false),
            Field::new("name", DataType::Utf8, false),
        ])),
        vec![
            Arc::new(Int32Array::from(vec![1, 2, 3])),
            Arc::new(StringArray::from(vec!["alice", "bob", "carol"])),
        ],
    )
    .unwrap()
}

fn shop(config: SessionConfig) -> FlintResult<SessionContext> {
    let ctx = SessionContext::with_config(config)?;
    // two batches so aggregation and joins see more than one input batch
    ctx.register_batches(
        "orders",
        vec![
            orders(
                vec![10, 11, 12],
                vec![Some(1), Some(2), Some(1)],
                vec![5, 7, 9],
            ),
            orders(vec![13, 14], vec![None, Some(4)], vec![3, 1]),
        ],
    )?;
    ctx.register_batches("customers", vec![customers()])?;
    Ok(ctx)
}

fn single(ctx: &SessionContext, sql: &str) -> FlintResult<RecordBatch> {
    let df = ctx.sql(sql)?;
    let batches = df.collect()?;
    Ok(concat_batches(&df.schema(), &batches)?)
}

fn i32_column(batch: &RecordBatch, idx: usize) -> Vec<Option<i32>> {
    let array = batch
        .column(idx)
        .as_any()
        .downcast_ref::<Int32Array>()
        .unwrap();
    array.iter().collect()
}

fn strings(batch: &RecordBatch, idx: usize) -> Vec<Option<String>> {
    let array = batch
        .column(idx)
        .as_any()
        .downcast_ref::<StringArray>()
        .unwrap();
    array.iter().map(|v| v.map(str::to_string)).collect()
}

// ═══════════════════════════════════════════════════════════
// 기본 쿼리
// ═══════════════════════════════════════════════════════════

#[test]
fn filter_and_project() -> FlintResult<()> {
    let ctx = SessionContext::new();
    ctx.register_batches("t", vec![table_t()])?;

    let df = ctx.sql("SELECT a FROM t WHERE b > 15")?;
    let schema = df.schema();
    assert_eq!(schema.fields().len(), 1);
    assert_eq!(schema.field(0).name(), "a");
    assert_eq!(schema.field(0).data_type(), &DataType::Int32);

    let batch = concat_batches(&schema, &df.collect()?)?;
    assert_eq!(i32_column(&batch, 0), vec![Some(2), Some(3)]);
    Ok(())
}

#[test]
fn select_literal_without_from() -> FlintResult<()> {
    let ctx = SessionContext::new();
    let batch = single(&ctx, "SELECT 1")?;
    assert_eq!(batch.num_rows(), 1);
    assert_eq!(batch.schema().field(0).name(), "Int64(1)");
    let values = batch
        .column(0)
        .as_any()
        .downcast_ref::<Int64Array>()
        .unwrap();
    assert_eq!(values.value(0), 1);
    Ok(())
}

#[test]
fn repeated_execution_is_stable() -> FlintResult<()> {
    let ctx = shop(SessionConfig::default())?;
    let sql = "SELECT customer, sum(amount) AS total FROM orders GROUP BY customer ORDER BY customer";
    let df = ctx.sql(sql)?;
    let first = df.to_pretty_string()?;
    assert_eq!(df.to_pretty_string()?, first);
    assert_eq!(ctx.sql(sql)?.to_pretty_string()?, first);
    Ok(())
}

#[test]
fn order_by_with_nulls_and_limit() -> FlintResult<()> {
    let ctx = shop(SessionConfig::default())?;
    let batch = single(
        &ctx,
        "SELECT customer FROM orders ORDER BY customer DESC LIMIT 3",
    )?;
    // descending puts NULL first
    assert_eq!(i32_column(&batch, 0), vec![None, Some(4), Some(2)]);

    let batch = single(&ctx, "SELECT id FROM orders ORDER BY id LIMIT 2 OFFSET 1")?;
    assert_eq!(i32_column(&batch, 0), vec![Some(11), Some(12)]);
    Ok(())
}

#[test]
fn order_by_prefers_output_alias() -> FlintResult<()> {
    let ctx = SessionContext::new();
    let batch = RecordBatch::try_new(
        Arc::new(Schema::new(vec![
            Field::new("a", DataType::Int32, false),
            Field::new("b", DataType::Int32, false),
        ])),
        vec![
            Arc::new(Int32Array::from(vec![1, 2, 3])),
            Arc::new(Int32Array::from(vec![30, 10, 20])),
        ],
    )?;
    ctx.register_batches("t", vec![batch])?;

    let sorted = single(&ctx, "SELECT b AS a FROM t ORDER BY a")?;
    assert_eq!(i32_column(&sorted, 0), vec![Some(10), Some(20), Some(30)]);

    let swapped = single(&ctx, "SELECT a AS b, b AS a FROM t ORDER BY b")?;
    assert_eq!(i32_column(&swapped, 0), vec![Some(1), Some(2), Some(3)]);
    assert_eq!(i32_column(&swapped, 1), vec![Some(30), Some(10), Some(20)]);
    Ok(())
}

#[test]
fn distinct_removes_duplicates() -> FlintResult<()> {
    let ctx = shop(SessionConfig::default())?;
    let batch = single(
        &ctx,
        "SELECT DISTINCT customer FROM orders WHERE customer IS NOT NULL ORDER BY customer",
    )?;
    assert_eq!(i32_column(&batch, 0), vec![Some(1), Some(2), Some(4)]);
    Ok(())
}

// ═══════════════════════════════════════════════════════════
// 집계
// ═══════════════════════════════════════════════════════════

#[test]
fn group_by_with_having() -> FlintResult<()> {
    let ctx = shop(SessionConfig::default())?;
    let batch = single(
        &ctx,
        "SELECT customer, count(*) AS n, sum(amount) AS total FROM orders \
         GROUP BY customer HAVING count(*) > 1",
    )?;
    assert_eq!(batch.num_rows(), 1);
    assert_eq!(i32_column(&batch, 0), vec![Some(1)]);
    let totals = batch
        .column(2)
        .as_any()
        .downcast_ref::<Int64Array>()
        .unwrap();
    assert_eq!(totals.value(0), 14);
    Ok(())
}

#[test]
fn global_aggregates() -> FlintResult<()> {
    let ctx = shop(SessionConfig::default())?;
    let batch = single(
        &ctx,
        "SELECT count(*), count(customer), min(amount), max(amount), avg(amount) FROM orders",
    )?;
    assert_eq!(batch.num_rows(), 1);
    let count = |idx: usize| {
        batch
            .column(idx)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap()
            .value(0)
    };
    assert_eq!(count(0), 5);
    assert_eq!(count(1), 4);
    assert_eq!(count(2), 1);
    assert_eq!(count(3), 9);
    let avg = batch
        .column(4)
        .as_any()
        .downcast_ref::<Float64Array>()
        .unwrap();
    assert!((avg.value(0) - 5.0).abs() < f64::EPSILON);
    Ok(())
}

#[test]
fn aggregate_over_empty_input() -> FlintResult<()> {
    let ctx = shop(SessionConfig::default())?;
    let batch = single(
        &ctx,
        "SELECT count(*), sum(amount) FROM orders WHERE id > 100",
    )?;
    assert_eq!(batch.num_rows(), 1);
    let count = batch
        .column(0)
        .as_any()
        .downcast_ref::<Int64Array>()
        .unwrap();
    assert_eq!(count.value(0), 0);
    assert!(batch.column(1).is_null(0));

    let grouped = single(
        &ctx,
        "SELECT customer, count(*) FROM orders WHERE id > 100 GROUP BY customer",
    )?;
    assert_eq!(grouped.num_rows(), 0);
    Ok(())
}

// ═══════════════════════════════════════════════════════════
// 조인
// ═══════════════════════════════════════════════════════════

const JOIN_QUERIES: [&str; 4] = [
    "SELECT o.id, c.name FROM orders o JOIN customers c ON o.customer = c.id ORDER BY o.id",
    "SELECT o.id, c.name FROM orders o LEFT JOIN customers c ON o.customer = c.id ORDER BY o.id",
    "SELECT o.id, c.name FROM orders o RIGHT JOIN customers c ON o.customer = c.id ORDER BY c.name, o.id",
    "SELECT o.id, c.name FROM orders o FULL JOIN customers c ON o.customer = c.id AND o.amount > 5 \
     ORDER BY c.name, o.id",
];

#[test]
fn inner_and_left_join_results() -> FlintResult<()> {
    let ctx = shop(SessionConfig::default())?;

    let inner = single(&ctx, JOIN_QUERIES[0])?;
    assert_eq!(i32_column(&inner, 0), vec![Some(10), Some(11), Some(12)]);
    assert_eq!(
        strings(&inner, 1),
        vec![
            Some("alice".to_string()),
            Some("bob".to_string()),
            Some("alice".to_string())
        ]
    );

    // NULL keys never match, unmatched rows are padded
    let left = single(&ctx, JOIN_QUERIES[1])?;
    assert_eq!(left.num_rows(), 5);
    let names = strings(&left, 1);
    assert_eq!(names[3], None);
    assert_eq!(names[4], None);

    let right = single(&ctx, JOIN_QUERIES[2])?;
    let names = strings(&right, 1);
    assert_eq!(names.len(), 4);
    assert_eq!(names[3], Some("carol".to_string()));
    assert_eq!(i32_column(&right, 0)[3], None);
    Ok(())
}

#[test]
fn hash_and_sort_merge_joins_agree() -> FlintResult<()> {
    let hash = shop(SessionConfig::default())?;
    let merge = shop(SessionConfig::default().with_prefer_hash_join(false))?;
    for sql in JOIN_QUERIES {
        assert_eq!(
            hash.sql(sql)?.to_pretty_string()?,
            merge.sql(sql)?.to_pretty_string()?,
            "{sql}"
        );
    }

    let sql = "SELECT o.id FROM orders o JOIN customers c ON o.customer = c.id WHERE c.name = 'bob'";
    assert!(hash.sql(sql)?.explain()?.contains("HashJoinExec"));
    assert!(merge.sql(sql)?.explain()?.contains("SortMergeJoinExec"));
    Ok(())
}

#[test]
fn cross_join_counts_every_pair() -> FlintResult<()> {
    let ctx = shop(SessionConfig::default())?;
    assert_eq!(
        ctx.sql("SELECT o.id, c.id FROM orders o, customers c")?
            .count()?,
        15
    );
    assert_eq!(
        ctx.sql("SELECT o.id FROM orders o CROSS JOIN customers c WHERE o.id > c.id + 11")?
            .count()?,
        3
    );
    Ok(())
}

#[test]
fn derived_table() -> FlintResult<()> {
    let ctx = shop(SessionConfig::default())?;
    let batch = single(
        &ctx,
        "SELECT s.customer FROM (SELECT customer, sum(amount) AS total FROM orders GROUP BY customer) AS s \
         WHERE s.total > 6 ORDER BY s.customer",
    )?;
    assert_eq!(i32_column(&batch, 0), vec![Some(1), Some(2)]);
    Ok(())
}

// ═══════════════════════════════════════════════════════════
// 에러
// ═══════════════════════════════════════════════════════════

#[test]
fn planning_errors() -> FlintResult<()> {
    let ctx = SessionContext::new();
    ctx.register_batches("t", vec![table_t()])?;

    assert!(matches!(
        ctx.sql("SELECT nope FROM t"),
        Err(FlintError::ColumnNotFound(_))
    ));
    assert!(matches!(
        ctx.sql("SELECT a FROM missing"),
        Err(FlintError::TableNotFound(_))
    ));
    assert!(matches!(
        ctx.sql("SELECT a FROM t t1, t t2"),
        Err(FlintError::AmbiguousColumn { .. })
    ));
    assert!(matches!(
        ctx.sql("INSERT INTO t VALUES (1, 2)"),
        Err(FlintError::NotSupported(_))
    ));
    assert!(matches!(ctx.sql("SELEC a FROM t"), Err(FlintError::SqlParse { .. })));
    Ok(())
}

#[test]
fn duplicate_table_keeps_first_registration() -> FlintResult<()> {
    let ctx = SessionContext::new();
    ctx.register_batches("t", vec![table_t()])?;
    let err = ctx.register_batches("t", vec![customers()]).unwrap_err();
    assert!(matches!(err, FlintError::DuplicateTable(_)));
    assert_eq!(ctx.sql("SELECT b FROM t")?.count()?, 3);
    Ok(())
}

#[test]
fn division_by_zero_surfaces_at_collect() -> FlintResult<()> {
    let ctx = SessionContext::new();
    ctx.register_batches("t", vec![table_t()])?;
    let df = ctx.sql("SELECT a / 0 FROM t")?;
    assert!(matches!(df.collect(), Err(FlintError::DivisionByZero)));
    Ok(())
}

#[test]
fn closed_session() -> FlintResult<()> {
    let ctx = SessionContext::new();
    ctx.register_batches("t", vec![table_t()])?;
    let df = ctx.sql("SELECT a FROM t")?;
    drop(ctx);
    assert!(matches!(df.collect(), Err(FlintError::SessionClosed)));
    Ok(())
}

#[test]
fn memory_limit_is_enforced() -> FlintResult<()> {
    let ctx = shop(SessionConfig::default().with_memory_limit(16))?;
    let err = ctx
        .sql("SELECT id FROM orders ORDER BY amount")?
        .collect()
        .unwrap_err();
    assert!(matches!(err, FlintError::ResourcesExhausted { .. }));
    Ok(())
}

// ═══════════════════════════════════════════════════════════
// 세션 속성
// ═══════════════════════════════════════════════════════════

#[test]
fn select_star_round_trips_registered_batches() -> FlintResult<()> {
    let ctx = SessionContext::new();
    let original = table_t();
    ctx.register_batches("t", vec![original.clone()])?;

    let df = ctx.sql("SELECT * FROM t")?;
    assert_eq!(df.schema(), original.schema());
    let batch = concat_batches(&df.schema(), &df.collect()?)?;
    assert_eq!(batch, original);
    Ok(())
}

#[test]
fn session_and_dataframe_cross_threads() -> FlintResult<()> {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<SessionContext>();
    assert_send_sync::<flint_core::DataFrame>();

    let ctx = shop(SessionConfig::default())?;
    let df = ctx.sql("SELECT id FROM orders WHERE amount > 4")?;
    let handle = std::thread::spawn(move || df.count());
    assert_eq!(handle.join().unwrap()?, 3);
    Ok(())
}
