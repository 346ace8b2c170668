//! PhysicalPlanner 구현
//!
//! LogicalPlan → PhysicalPlan 변환. Column references are resolved to input
//! indices and each join gets an algorithm.

use super::schema::PlanSchema;
use super::types::*;
use crate::config::SessionConfig;
use crate::error::{FlintError, FlintResult};
use crate::sql::planner::expr::conjunction;
use std::sync::Arc;
use tracing::debug;

/// 물리 플랜 빌더: LogicalPlan → PhysicalPlan 변환
#[derive(Debug, Clone)]
pub struct PhysicalPlanner {
    prefer_hash_join: bool,
    hash_join_memory_budget: usize,
}

impl PhysicalPlanner {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            prefer_hash_join: config.prefer_hash_join,
            hash_join_memory_budget: config.hash_join_memory_budget,
        }
    }

    /// Convert LogicalPlan → PhysicalPlan
    pub fn plan(&self, logical_plan: &LogicalPlan) -> FlintResult<PhysicalPlan> {
        let plan = self.plan_node(logical_plan, None)?;
        debug!(target: "flint::sql", "physical plan:\n{}", plan.display_indent());
        Ok(plan)
    }

    /// `ordering` is the sort a parent applies directly to this node's output.
    fn plan_node(
        &self,
        plan: &LogicalPlan,
        ordering: Option<&[SortExpr]>,
    ) -> FlintResult<PhysicalPlan> {
        match plan {
            LogicalPlan::Scan {
                table,
                projection,
                filters,
                schema,
                ..
            } => {
                let scan = PhysicalPlan::TableScan {
                    table: table.name.clone(),
                    source: Arc::clone(&table.source),
                    projection: projection.clone(),
                    filter_hint: filters.clone(),
                    schema: schema.to_arrow(),
                };
                // hints are advisory; the filters are applied here regardless
                match conjunction(filters.iter().cloned()) {
                    Some(predicate) => Ok(PhysicalPlan::Filter {
                        predicate: create_physical_expr(&predicate, schema)?,
                        input: Box::new(scan),
                    }),
                    None => Ok(scan),
                }
            }
            LogicalPlan::Project {
                input,
                exprs,
                schema,
            } => {
                let input_plan = self.plan_node(input, None)?;
                let exprs = exprs
                    .iter()
                    .map(|e| create_physical_expr(e, input.schema()))
                    .collect::<FlintResult<Vec<_>>>()?;
                Ok(PhysicalPlan::Projection {
                    input: Box::new(input_plan),
                    exprs,
                    schema: schema.to_arrow(),
                })
            }
            LogicalPlan::Filter { input, predicate } => {
                let predicate = create_physical_expr(predicate, input.schema())?;
                Ok(PhysicalPlan::Filter {
                    input: Box::new(self.plan_node(input, ordering)?),
                    predicate,
                })
            }
            LogicalPlan::Aggregate {
                input,
                group_by,
                aggregates,
                schema,
            } => {
                let input_schema = input.schema();
                let group_by = group_by
                    .iter()
                    .map(|e| create_physical_expr(e, input_schema))
                    .collect::<FlintResult<Vec<_>>>()?;
                let aggregates = aggregates
                    .iter()
                    .map(|e| create_aggregate_expr(e, input_schema))
                    .collect::<FlintResult<Vec<_>>>()?;
                Ok(PhysicalPlan::HashAggregate {
                    input: Box::new(self.plan_node(input, None)?),
                    group_by,
                    aggregates,
                    schema: schema.to_arrow(),
                })
            }
            LogicalPlan::Join {
                left,
                right,
                join_type,
                on,
                filter,
                schema,
            } => self.plan_join(
                left,
                right,
                *join_type,
                on,
                filter.as_ref(),
                schema,
                ordering,
            ),
            LogicalPlan::Sort { input, order_by } => {
                let order = order_by
                    .iter()
                    .map(|s| create_sort_expr(s, input.schema()))
                    .collect::<FlintResult<Vec<_>>>()?;
                Ok(PhysicalPlan::Sort {
                    input: Box::new(self.plan_node(input, Some(order_by))?),
                    order_by: order,
                    fetch: None,
                })
            }
            LogicalPlan::Limit { input, skip, fetch } => {
                let mut input_plan = self.plan_node(input, None)?;
                // top-k: the sort only needs to keep skip + fetch rows
                if let (PhysicalPlan::Sort { fetch: sort_fetch, .. }, Some(fetch)) =
                    (&mut input_plan, fetch)
                {
                    *sort_fetch = Some(skip.saturating_add(*fetch));
                }
                Ok(PhysicalPlan::Limit {
                    input: Box::new(input_plan),
                    skip: *skip,
                    fetch: *fetch,
                })
            }
            // qualifiers do not exist at execution time
            LogicalPlan::SubqueryAlias { input, .. } => self.plan_node(input, ordering),
            LogicalPlan::EmptyRelation {
                produce_one_row,
                schema,
            } => Ok(PhysicalPlan::Empty {
                produce_one_row: *produce_one_row,
                schema: schema.to_arrow(),
            }),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn plan_join(
        &self,
        left: &LogicalPlan,
        right: &LogicalPlan,
        join_type: JoinType,
        on: &[(Expr, Expr)],
        filter: Option<&Expr>,
        schema: &PlanSchema,
        ordering: Option<&[SortExpr]>,
    ) -> FlintResult<PhysicalPlan> {
        let left_plan = Box::new(self.plan_node(left, None)?);
        let right_plan = Box::new(self.plan_node(right, None)?);
        let filter = filter
            .map(|f| create_physical_expr(f, schema))
            .transpose()?;
        let arrow_schema = schema.to_arrow();

        if on.is_empty() {
            return Ok(PhysicalPlan::NestedLoopJoin {
                left: left_plan,
                right: right_plan,
                filter,
                join_type,
                schema: arrow_schema,
            });
        }

        let keys = on
            .iter()
            .map(|(l, r)| {
                Ok((
                    create_physical_expr(l, left.schema())?,
                    create_physical_expr(r, right.schema())?,
                ))
            })
            .collect::<FlintResult<Vec<_>>>()?;

        if self.use_hash_join(right, on, ordering) {
            Ok(PhysicalPlan::HashJoin {
                left: left_plan,
                right: right_plan,
                on: keys,
                filter,
                join_type,
                schema: arrow_schema,
            })
        } else {
            Ok(PhysicalPlan::SortMergeJoin {
                left: left_plan,
                right: right_plan,
                on: keys,
                filter,
                join_type,
                schema: arrow_schema,
            })
        }
    }

    /// Hash join unless disabled, the parent sorts on the join keys, or the
    /// build side is known to exceed the memory budget.
    fn use_hash_join(
        &self,
        build: &LogicalPlan,
        on: &[(Expr, Expr)],
        ordering: Option<&[SortExpr]>,
    ) -> bool {
        if !self.prefer_hash_join {
            return false;
        }
        if ordering.is_some_and(|order| sorts_on_keys(order, on)) {
            return false;
        }
        match estimated_size(build) {
            Some(bytes) => bytes <= self.hash_join_memory_budget,
            None => true,
        }
    }
}

/// Whether an ascending sort's leading keys are join key columns.
fn sorts_on_keys(order: &[SortExpr], on: &[(Expr, Expr)]) -> bool {
    !order.is_empty()
        && order.len() <= on.len()
        && order.iter().zip(on).all(|(sort, (l, r))| {
            sort.asc && (sort.expr == *l || sort.expr == *r)
        })
}

/// Upper bound on the bytes a plan produces, from source statistics.
fn estimated_size(plan: &LogicalPlan) -> Option<usize> {
    match plan {
        LogicalPlan::Scan {
            table, projection, ..
        } => {
            let stats = table.source.statistics();
            let total = stats.total_byte_size?;
            let width = table.source.schema().fields().len().max(1);
            Some(match projection {
                Some(columns) => total / width * columns.len().max(1),
                None => total,
            })
        }
        LogicalPlan::EmptyRelation { .. } => Some(0),
        LogicalPlan::Join { left, right, .. } => {
            let (l, r) = (estimated_size(left)?, estimated_size(right)?);
            Some(l.saturating_mul(r.max(1)))
        }
        other => other.inputs().into_iter().map(estimated_size).sum(),
    }
}

/// Lower a logical expression over `schema` to an index-resolved one.
pub fn create_physical_expr(expr: &Expr, schema: &PlanSchema) -> FlintResult<PhysicalExpr> {
    let boxed = |e: &Expr| create_physical_expr(e, schema).map(Box::new);
    Ok(match expr {
        Expr::Column(column) => PhysicalExpr::Column(schema.index_of(column)?),
        Expr::Literal(value) => PhysicalExpr::Literal(value.clone()),
        Expr::BinaryOp { left, op, right } => PhysicalExpr::BinaryOp {
            left: boxed(left)?,
            op: *op,
            right: boxed(right)?,
        },
        Expr::Not(e) => PhysicalExpr::Not(boxed(e)?),
        Expr::Negative(e) => PhysicalExpr::Negative(boxed(e)?),
        Expr::IsNull(e) => PhysicalExpr::IsNull(boxed(e)?),
        Expr::IsNotNull(e) => PhysicalExpr::IsNotNull(boxed(e)?),
        Expr::Cast { expr, data_type } => PhysicalExpr::Cast {
            expr: boxed(expr)?,
            data_type: data_type.clone(),
        },
        Expr::ScalarFunction { func, args } => PhysicalExpr::ScalarFunc {
            func: *func,
            args: args
                .iter()
                .map(|a| create_physical_expr(a, schema))
                .collect::<FlintResult<_>>()?,
        },
        Expr::Alias { expr, .. } => create_physical_expr(expr, schema)?,
        Expr::Aggregate { .. } => {
            return Err(FlintError::Internal(format!("aggregate {expr} outside an Aggregate node")));
        }
    })
}

fn create_aggregate_expr(expr: &Expr, input: &PlanSchema) -> FlintResult<PhysicalAggExpr> {
    let data_type = expr.data_type(input)?;
    match expr {
        Expr::Alias { expr, .. } => create_aggregate_expr(expr, input),
        Expr::Aggregate { func, arg } => Ok(PhysicalAggExpr {
            func: *func,
            arg: arg
                .as_ref()
                .map(|a| create_physical_expr(a, input))
                .transpose()?,
            data_type,
        }),
        other => Err(FlintError::Internal(format!("expected an aggregate call, found {other}"))),
    }
}

fn create_sort_expr(sort: &SortExpr, schema: &PlanSchema) -> FlintResult<PhysicalSortExpr> {
    Ok(PhysicalSortExpr {
        expr: create_physical_expr(&sort.expr, schema)?,
        asc: sort.asc,
        nulls_first: sort.nulls_first,
    })
}
