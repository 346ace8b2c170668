//! Rule 2: Projection Pushdown
//!
//! 필요한 컬럼만 읽도록 Scan에 projection 적용

use crate::error::FlintResult;
use crate::sql::planner::logical::{join_plan, subquery_alias};
use crate::sql::planner::{Expr, LogicalPlan, PlanSchema};
use std::collections::BTreeSet;
use std::sync::Arc;

use super::OptimizationRule;

/// 필요한 컬럼만 읽도록 Scan에 projection 적용
///
/// Walks the plan top-down carrying the output columns (by index) the
/// parent needs. Scans read only those columns and intermediate projections
/// drop unused expressions.
pub struct ProjectionPushdownRule;

impl OptimizationRule for ProjectionPushdownRule {
    fn name(&self) -> &str {
        "ProjectionPushdown"
    }

    fn apply(&self, plan: LogicalPlan) -> FlintResult<LogicalPlan> {
        let required = (0..plan.schema().len()).collect();
        self.prune(plan, &required)
    }
}

impl ProjectionPushdownRule {
    fn prune(&self, plan: LogicalPlan, required: &BTreeSet<usize>) -> FlintResult<LogicalPlan> {
        match plan {
            LogicalPlan::Project {
                input,
                exprs,
                schema,
            } => {
                let (exprs, schema) = if required.len() == exprs.len() {
                    (exprs, schema)
                } else {
                    let kept: Vec<Expr> = required.iter().map(|&i| exprs[i].clone()).collect();
                    let fields = required.iter().map(|&i| schema.field(i).clone()).collect();
                    (kept, Arc::new(PlanSchema::new(fields)?))
                };
                let mut needed = BTreeSet::new();
                column_indices(&exprs, input.schema(), &mut needed)?;
                Ok(LogicalPlan::Project {
                    input: Box::new(self.prune(*input, &needed)?),
                    exprs,
                    schema,
                })
            }
            LogicalPlan::Filter { input, predicate } => {
                let mut needed = required.clone();
                column_indices([&predicate], input.schema(), &mut needed)?;
                Ok(LogicalPlan::Filter {
                    input: Box::new(self.prune(*input, &needed)?),
                    predicate,
                })
            }
            LogicalPlan::Sort { input, order_by } => {
                let mut needed = required.clone();
                column_indices(order_by.iter().map(|s| &s.expr), input.schema(), &mut needed)?;
                Ok(LogicalPlan::Sort {
                    input: Box::new(self.prune(*input, &needed)?),
                    order_by,
                })
            }
            LogicalPlan::Limit { input, skip, fetch } => Ok(LogicalPlan::Limit {
                input: Box::new(self.prune(*input, required)?),
                skip,
                fetch,
            }),
            LogicalPlan::SubqueryAlias { input, alias, .. } => {
                // alias fields line up with the input's fields
                subquery_alias(self.prune(*input, required)?, alias)
            }
            LogicalPlan::Aggregate {
                input,
                group_by,
                aggregates,
                schema,
            } => {
                let mut needed = BTreeSet::new();
                column_indices(
                    group_by.iter().chain(&aggregates),
                    input.schema(),
                    &mut needed,
                )?;
                Ok(LogicalPlan::Aggregate {
                    input: Box::new(self.prune(*input, &needed)?),
                    group_by,
                    aggregates,
                    schema,
                })
            }
            LogicalPlan::Join {
                left,
                right,
                join_type,
                on,
                filter,
                schema,
            } => {
                let mut needed = required.clone();
                let exprs = on.iter().flat_map(|(l, r)| [l, r]).chain(filter.as_ref());
                column_indices(exprs, &schema, &mut needed)?;
                let left_width = left.schema().len();
                let (left_needed, right_needed): (BTreeSet<usize>, BTreeSet<usize>) =
                    needed.iter().partition(|&&i| i < left_width);
                let right_needed = right_needed.iter().map(|i| i - left_width).collect();
                let left = self.prune(*left, &left_needed)?;
                let right = self.prune(*right, &right_needed)?;
                join_plan(left, right, join_type, on, filter)
            }
            LogicalPlan::Scan {
                table,
                qualifier,
                projection,
                filters,
                schema,
            } => {
                let mut needed = required.clone();
                column_indices(&filters, &schema, &mut needed)?;
                // file readers need at least one column to report row counts
                if needed.is_empty() && !schema.is_empty() {
                    needed.insert(0);
                }
                if needed.len() == schema.len() {
                    return Ok(LogicalPlan::Scan {
                        table,
                        qualifier,
                        projection,
                        filters,
                        schema,
                    });
                }
                let source_indices: Vec<usize> = match &projection {
                    Some(indices) => indices.clone(),
                    None => (0..schema.len()).collect(),
                };
                let projection = needed.iter().map(|&i| source_indices[i]).collect();
                let fields = needed.iter().map(|&i| schema.field(i).clone()).collect();
                Ok(LogicalPlan::Scan {
                    table,
                    qualifier,
                    projection: Some(projection),
                    filters,
                    schema: Arc::new(PlanSchema::new(fields)?),
                })
            }
            empty @ LogicalPlan::EmptyRelation { .. } => Ok(empty),
        }
    }
}

/// Indices in `schema` of every column the expressions reference.
fn column_indices<'a>(
    exprs: impl IntoIterator<Item = &'a Expr>,
    schema: &PlanSchema,
    out: &mut BTreeSet<usize>,
) -> FlintResult<()> {
    for expr in exprs {
        for column in expr.columns() {
            out.insert(schema.index_of(&column)?);
        }
    }
    Ok(())
}
