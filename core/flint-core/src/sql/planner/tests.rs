use super::*;
use crate::catalog::{Catalog, CatalogSnapshot, MemTable};
use crate::config::SessionConfig;
use crate::error::FlintError;
use crate::sql::parser::SqlParser;
use arrow::array::{Int32Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use std::sync::Arc;

fn catalog() -> CatalogSnapshot {
    let catalog = Catalog::new();
    let t = RecordBatch::try_new(
        Arc::new(Schema::new(vec![
            Field::new("a", DataType::Int32, false),
            Field::new("b", DataType::Int32, true),
        ])),
        vec![
            Arc::new(Int32Array::from(vec![1, 2, 3])),
            Arc::new(Int32Array::from(vec![10, 20, 30])),
        ],
    )
    .unwrap();
    let u = RecordBatch::try_new(
        Arc::new(Schema::new(vec![
            Field::new("a", DataType::Int32, false),
            Field::new("c", DataType::Utf8, true),
        ])),
        vec![
            Arc::new(Int32Array::from(vec![1, 3])),
            Arc::new(StringArray::from(vec!["x", "y"])),
        ],
    )
    .unwrap();
    catalog
        .register("t", Arc::new(MemTable::from_batches(vec![t]).unwrap()))
        .unwrap();
    catalog
        .register("u", Arc::new(MemTable::from_batches(vec![u]).unwrap()))
        .unwrap();
    catalog.snapshot()
}

fn plan(sql: &str) -> Result<LogicalPlan, FlintError> {
    let statement = SqlParser::default().parse(sql)?;
    LogicalPlanner::new(&catalog()).plan(&statement)
}

fn field_names(plan: &LogicalPlan) -> Vec<String> {
    plan.schema()
        .fields()
        .iter()
        .map(|f| f.name().to_string())
        .collect()
}

// ── Logical planning ──

#[test]
fn test_filter_widens_comparison() {
    let plan = plan("SELECT a FROM t WHERE b > 15").unwrap();
    assert_eq!(
        plan.display_indent(),
        "Projection: t.a\n  Filter: CAST(t.b AS Int64) > Int64(15)\n    Scan: t\n"
    );
    let schema = plan.schema().to_arrow();
    assert_eq!(schema.field(0).name(), "a");
    assert_eq!(schema.field(0).data_type(), &DataType::Int32);
}

#[test]
fn test_literal_select_is_named_after_display_form() {
    let plan = plan("SELECT 1").unwrap();
    assert_eq!(field_names(&plan), vec!["Int64(1)"]);
    assert!(matches!(
        plan,
        LogicalPlan::Project { ref input, .. }
            if matches!(
                **input,
                LogicalPlan::EmptyRelation { produce_one_row: true, .. }
            )
    ));
}

#[test]
fn test_wildcards_expand_in_order() {
    let plan = plan("SELECT *, u.* FROM t JOIN u ON t.a = u.a").unwrap();
    assert_eq!(field_names(&plan), vec!["a", "b", "a", "c", "a", "c"]);
}

#[test]
fn test_unknown_names() {
    assert!(matches!(
        plan("SELECT bogus FROM t"),
        Err(FlintError::ColumnNotFound(_))
    ));
    assert!(matches!(
        plan("SELECT * FROM missing"),
        Err(FlintError::TableNotFound(_))
    ));
    assert!(matches!(
        plan("SELECT a FROM t, u"),
        Err(FlintError::AmbiguousColumn { .. })
    ));
}

#[test]
fn test_type_errors() {
    assert!(matches!(
        plan("SELECT t.a + u.c FROM t JOIN u ON t.a = u.a"),
        Err(FlintError::TypeMismatch { .. })
    ));
    assert!(matches!(
        plan("SELECT a FROM t WHERE b"),
        Err(FlintError::TypeMismatch { .. })
    ));
}

#[test]
fn test_unsupported_statements() {
    assert!(matches!(
        plan("INSERT INTO t VALUES (1, 2)"),
        Err(FlintError::NotSupported(_))
    ));
    assert!(matches!(
        plan("SELECT a FROM t UNION SELECT a FROM u"),
        Err(FlintError::NotSupported(_))
    ));
}

#[test]
fn test_join_on_splits_keys_and_residual() {
    let plan = plan("SELECT t.b FROM t LEFT JOIN u ON t.a = u.a AND u.c = 'x'").unwrap();
    let LogicalPlan::Project { input, .. } = plan else {
        panic!("expected projection");
    };
    let LogicalPlan::Join {
        on,
        filter,
        join_type,
        schema,
        ..
    } = *input
    else {
        panic!("expected join");
    };
    assert_eq!(join_type, JoinType::Left);
    assert_eq!(on.len(), 1);
    assert_eq!(on[0].0.to_string(), "t.a");
    assert_eq!(on[0].1.to_string(), "u.a");
    assert_eq!(filter.unwrap().to_string(), "u.c = Utf8(\"x\")");
    // the right side of a left join is null-padded
    assert!(!schema.field(0).field.is_nullable());
    assert!(schema.field(2).field.is_nullable());
}

#[test]
fn test_group_by_and_having() {
    let plan = plan("SELECT b, count(*) AS n FROM t GROUP BY b HAVING sum(a) > 1").unwrap();
    assert_eq!(field_names(&plan), vec!["b", "n"]);
    let LogicalPlan::Project { input, .. } = &plan else {
        panic!("expected projection");
    };
    let LogicalPlan::Filter { input, .. } = input.as_ref() else {
        panic!("expected HAVING filter");
    };
    let LogicalPlan::Aggregate { aggregates, schema, .. } = input.as_ref() else {
        panic!("expected aggregate");
    };
    assert_eq!(aggregates.len(), 2);
    let names: Vec<&str> = schema.fields().iter().map(|f| f.name()).collect();
    assert_eq!(names, vec!["b", "count(*)", "sum(t.a)"]);
    assert_eq!(schema.field(1).field.data_type(), &DataType::Int64);
}

#[test]
fn test_having_without_aggregation_is_rejected() {
    assert!(matches!(
        plan("SELECT a FROM t HAVING a > 1"),
        Err(FlintError::Plan(_))
    ));
    assert!(matches!(plan("SELECT a, count(*) FROM t"), Err(FlintError::Plan(_))));
}

#[test]
fn test_order_by_alias_and_ordinal() {
    let plan = plan("SELECT a AS x, b FROM t ORDER BY x DESC, 2").unwrap();
    let LogicalPlan::Project { input, .. } = plan else {
        panic!("expected projection");
    };
    let LogicalPlan::Sort { order_by, .. } = *input else {
        panic!("expected sort below projection");
    };
    assert_eq!(order_by[0].expr.to_string(), "t.a");
    assert!(!order_by[0].asc);
    assert!(order_by[0].nulls_first);
    assert_eq!(order_by[1].expr.to_string(), "t.b");
    assert!(!order_by[1].nulls_first);
}

fn sort_keys(sql: &str) -> Vec<String> {
    let LogicalPlan::Project { input, .. } = plan(sql).unwrap() else {
        panic!("expected projection");
    };
    let LogicalPlan::Sort { order_by, .. } = *input else {
        panic!("expected sort below projection");
    };
    order_by.iter().map(|s| s.expr.to_string()).collect()
}

#[test]
fn test_order_by_output_alias_shadows_input_column() {
    assert_eq!(sort_keys("SELECT b AS a FROM t ORDER BY a"), vec!["t.b"]);
    assert_eq!(
        sort_keys("SELECT a AS b, b AS a FROM t ORDER BY b"),
        vec!["t.a"]
    );
    // qualified names still reach the input column
    assert_eq!(sort_keys("SELECT b AS a FROM t ORDER BY t.a"), vec!["t.a"]);
    // WHERE keeps resolving against the input
    let text = plan("SELECT b AS a FROM t WHERE a > 1 ORDER BY a")
        .unwrap()
        .display_indent();
    assert!(
        text.contains("Filter: CAST(t.a AS Int64) > Int64(1)"),
        "{text}"
    );
}

#[test]
fn test_derived_table_requalifies_columns() {
    let plan = plan("SELECT s.a FROM (SELECT a FROM t) AS s WHERE s.a > 1").unwrap();
    assert_eq!(field_names(&plan), vec!["a"]);
    assert_eq!(plan.schema().field(0).qualifier.as_deref(), Some("s"));
}

#[test]
fn test_limit_offset() {
    let plan = plan("SELECT a FROM t LIMIT 2 OFFSET 1").unwrap();
    assert!(matches!(
        plan,
        LogicalPlan::Limit {
            skip: 1,
            fetch: Some(2),
            ..
        }
    ));
}

// ── Physical planning ──

#[test]
fn test_physical_plan_resolves_indices() {
    let logical = plan("SELECT b FROM t WHERE a = 2").unwrap();
    let physical = PhysicalPlanner::new(&SessionConfig::default())
        .plan(&logical)
        .unwrap();
    let PhysicalPlan::Projection { input, exprs, schema } = physical else {
        panic!("expected projection");
    };
    assert_eq!(exprs, vec![PhysicalExpr::Column(1)]);
    assert_eq!(schema.field(0).name(), "b");
    let PhysicalPlan::Filter { input, predicate } = *input else {
        panic!("expected filter");
    };
    assert_eq!(predicate.to_string(), "CAST(#0 AS Int64) = Int64(2)");
    assert!(matches!(*input, PhysicalPlan::TableScan { ref table, .. } if table == "t"));
}

#[test]
fn test_physical_join_selection() {
    let logical = plan("SELECT t.b FROM t JOIN u ON t.a = u.a").unwrap();
    let hash = PhysicalPlanner::new(&SessionConfig::default())
        .plan(&logical)
        .unwrap();
    assert!(hash.display_indent().contains("HashJoin"));

    let cross = plan("SELECT t.b FROM t, u").unwrap();
    let nested = PhysicalPlanner::new(&SessionConfig::default())
        .plan(&cross)
        .unwrap();
    assert!(nested.display_indent().contains("NestedLoopJoin"));
}

#[test]
fn test_physical_aggregate_types() {
    let logical = plan("SELECT avg(a), max(b) FROM t").unwrap();
    let physical = PhysicalPlanner::new(&SessionConfig::default())
        .plan(&logical)
        .unwrap();
    let PhysicalPlan::Projection { input, .. } = physical else {
        panic!("expected projection");
    };
    let PhysicalPlan::HashAggregate { aggregates, group_by, .. } = *input else {
        panic!("expected aggregate");
    };
    assert!(group_by.is_empty());
    assert_eq!(aggregates[0].data_type, DataType::Float64);
    assert_eq!(aggregates[1].data_type, DataType::Int32);
}
