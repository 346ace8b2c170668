//! Rule 3: Constant Folding
//!
//! 상수 표현식을 컴파일 타임에 평가 (1 + 2 → 3)

use crate::batch::ScalarValue;
use crate::error::FlintResult;
use crate::sql::executor::evaluate_expr;
use crate::sql::planner::{
    BinaryOperator, Expr, LogicalPlan, PlanSchema, create_physical_expr,
};
use arrow::datatypes::Schema;
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use std::sync::Arc;

use super::{OptimizationRule, map_inputs};

/// 상수 표현식을 컴파일 타임에 평가 (1 + 2 → 3)
///
/// Literal-only subexpressions are evaluated with the executor's own kernels
/// on a single-row batch. An expression whose evaluation fails (division by
/// zero, an overflowing cast) is left in place so the error surfaces when
/// the query runs.
pub struct ConstantFoldingRule;

impl OptimizationRule for ConstantFoldingRule {
    fn name(&self) -> &str {
        "ConstantFolding"
    }

    fn apply(&self, plan: LogicalPlan) -> FlintResult<LogicalPlan> {
        self.fold(plan)
    }
}

/// What a folded predicate lets through.
enum Verdict {
    AllRows,
    NoRows,
    Unknown(Expr),
}

impl ConstantFoldingRule {
    fn fold(&self, plan: LogicalPlan) -> FlintResult<LogicalPlan> {
        let plan = map_inputs(plan, |input| self.fold(input))?;
        Ok(match plan {
            LogicalPlan::Filter { input, predicate } => match verdict(fold_expr(predicate)?) {
                Verdict::AllRows => *input,
                Verdict::NoRows => LogicalPlan::EmptyRelation {
                    produce_one_row: false,
                    schema: Arc::clone(input.schema()),
                },
                Verdict::Unknown(predicate) => LogicalPlan::Filter { input, predicate },
            },
            LogicalPlan::Scan {
                table,
                qualifier,
                projection,
                filters,
                schema,
            } => {
                let mut kept = Vec::with_capacity(filters.len());
                for filter in filters {
                    match verdict(fold_expr(filter)?) {
                        Verdict::AllRows => {}
                        Verdict::NoRows => {
                            return Ok(LogicalPlan::EmptyRelation {
                                produce_one_row: false,
                                schema,
                            });
                        }
                        Verdict::Unknown(filter) => kept.push(filter),
                    }
                }
                LogicalPlan::Scan {
                    table,
                    qualifier,
                    projection,
                    filters: kept,
                    schema,
                }
            }
            LogicalPlan::Project {
                input,
                exprs,
                schema,
            } => LogicalPlan::Project {
                input,
                exprs: exprs
                    .into_iter()
                    .map(fold_named)
                    .collect::<FlintResult<_>>()?,
                schema,
            },
            LogicalPlan::Aggregate {
                input,
                group_by,
                aggregates,
                schema,
            } => LogicalPlan::Aggregate {
                input,
                group_by: group_by
                    .into_iter()
                    .map(fold_expr)
                    .collect::<FlintResult<_>>()?,
                aggregates: aggregates
                    .into_iter()
                    .map(fold_expr)
                    .collect::<FlintResult<_>>()?,
                schema,
            },
            LogicalPlan::Join {
                left,
                right,
                join_type,
                on,
                filter,
                schema,
            } => {
                let on = on
                    .into_iter()
                    .map(|(l, r)| Ok((fold_expr(l)?, fold_expr(r)?)))
                    .collect::<FlintResult<_>>()?;
                let filter = match filter.map(fold_expr).transpose()? {
                    Some(Expr::Literal(ScalarValue::Boolean(true))) => None,
                    other => other,
                };
                LogicalPlan::Join {
                    left,
                    right,
                    join_type,
                    on,
                    filter,
                    schema,
                }
            }
            LogicalPlan::Sort { input, order_by } => LogicalPlan::Sort {
                input,
                order_by: order_by
                    .into_iter()
                    .map(|mut sort| {
                        sort.expr = fold_expr(sort.expr)?;
                        Ok(sort)
                    })
                    .collect::<FlintResult<_>>()?,
            },
            other => other,
        })
    }
}

/// Fold a projected expression, keeping its output name.
fn fold_named(expr: Expr) -> FlintResult<Expr> {
    let name = expr.output_name();
    let folded = fold_expr(expr)?;
    if folded.output_name() == name {
        Ok(folded)
    } else {
        Ok(folded.unalias().alias(name))
    }
}

/// Bottom-up: evaluate nodes whose children are all literals, then apply
/// the boolean identities (`x AND true = x`, `x OR true = true` and their
/// duals).
fn fold_expr(expr: Expr) -> FlintResult<Expr> {
    expr.transform_up(&mut |e| {
        let foldable = !matches!(
            e,
            Expr::Literal(_) | Expr::Column(_) | Expr::Alias { .. } | Expr::Aggregate { .. }
        ) && e.children().iter().all(|c| matches!(c, Expr::Literal(_)));
        if foldable {
            let expected = e.data_type(&PlanSchema::empty()).ok();
            if let Some(value) = evaluate_constant(&e) {
                // a NULL result only folds where the type is already Null
                if expected.as_ref() == Some(&value.data_type()) {
                    return Ok(Expr::Literal(value));
                }
            }
        }
        Ok(match e {
            Expr::BinaryOp {
                left,
                op: BinaryOperator::And,
                right,
            } if is_bool(&left, true) => *right,
            Expr::BinaryOp {
                left,
                op: BinaryOperator::And,
                right,
            } if is_bool(&right, true) => *left,
            Expr::BinaryOp {
                left,
                op: BinaryOperator::Or,
                right,
            } if is_bool(&left, false) => *right,
            Expr::BinaryOp {
                left,
                op: BinaryOperator::Or,
                right,
            } if is_bool(&right, false) => *left,
            Expr::BinaryOp {
                left,
                op: BinaryOperator::And,
                right,
            } if is_bool(&left, false) || is_bool(&right, false) => {
                Expr::Literal(ScalarValue::Boolean(false))
            }
            Expr::BinaryOp {
                left,
                op: BinaryOperator::Or,
                right,
            } if is_bool(&left, true) || is_bool(&right, true) => {
                Expr::Literal(ScalarValue::Boolean(true))
            }
            other => other,
        })
    })
}

fn is_bool(expr: &Expr, value: bool) -> bool {
    matches!(expr, Expr::Literal(ScalarValue::Boolean(v)) if *v == value)
}

fn verdict(predicate: Expr) -> Verdict {
    if !predicate.columns().is_empty() || predicate.contains_aggregate() {
        return Verdict::Unknown(predicate);
    }
    match evaluate_constant(&predicate) {
        Some(ScalarValue::Boolean(true)) => Verdict::AllRows,
        Some(ScalarValue::Boolean(false) | ScalarValue::Null) => Verdict::NoRows,
        _ => Verdict::Unknown(predicate),
    }
}

/// Evaluate a column-free expression; `None` if it would fail at runtime.
fn evaluate_constant(expr: &Expr) -> Option<ScalarValue> {
    let physical = create_physical_expr(expr, &PlanSchema::empty()).ok()?;
    let batch = RecordBatch::try_new_with_options(
        Arc::new(Schema::empty()),
        vec![],
        &RecordBatchOptions::new().with_row_count(Some(1)),
    )
    .ok()?;
    let array = evaluate_expr(&physical, &batch).ok()?;
    ScalarValue::from_array(&array, 0).ok()
}
