//! Rule 1: Predicate Pushdown
//!
//! Filter를 Scan에 가까이 이동하여 I/O 감소

use crate::error::FlintResult;
use crate::sql::planner::{
    BinaryOperator, Expr, JoinType, LogicalPlan, PlanSchema, conjunction, split_conjunction,
};

use super::{OptimizationRule, map_inputs};

/// Filter를 Scan에 가까이 이동하여 I/O 감소
pub struct PredicatePushdownRule;

impl OptimizationRule for PredicatePushdownRule {
    fn name(&self) -> &str {
        "PredicatePushdown"
    }

    fn apply(&self, plan: LogicalPlan) -> FlintResult<LogicalPlan> {
        self.push_down(plan)
    }
}

impl PredicatePushdownRule {
    fn push_down(&self, plan: LogicalPlan) -> FlintResult<LogicalPlan> {
        match plan {
            LogicalPlan::Filter { input, predicate } => {
                let optimized_input = self.push_down(*input)?;
                self.push_filter(optimized_input, predicate)
            }
            // an inner join's residual condition can move like a WHERE clause
            LogicalPlan::Join {
                left,
                right,
                join_type: JoinType::Inner,
                on,
                filter: Some(filter),
                schema,
            } => {
                let join = LogicalPlan::Join {
                    left: Box::new(self.push_down(*left)?),
                    right: Box::new(self.push_down(*right)?),
                    join_type: JoinType::Inner,
                    on,
                    filter: None,
                    schema,
                };
                self.push_filter(join, filter)
            }
            other => map_inputs(other, |input| self.push_down(input)),
        }
    }

    /// Place `predicate` as deep below `input` as its columns allow.
    fn push_filter(&self, input: LogicalPlan, predicate: Expr) -> FlintResult<LogicalPlan> {
        match input {
            LogicalPlan::Filter {
                input: inner,
                predicate: existing,
            } => self.push_filter(*inner, existing.and(predicate)),
            LogicalPlan::Scan {
                table,
                qualifier,
                projection,
                mut filters,
                schema,
            } => {
                for conjunct in split_conjunction(predicate) {
                    if !filters.contains(&conjunct) {
                        filters.push(conjunct);
                    }
                }
                Ok(LogicalPlan::Scan {
                    table,
                    qualifier,
                    projection,
                    filters,
                    schema,
                })
            }
            LogicalPlan::Project {
                input: project_input,
                exprs,
                schema,
            } => match substitute(&predicate, &schema, |i| Some(exprs[i].clone().unalias()))? {
                Some(rewritten) => Ok(LogicalPlan::Project {
                    input: Box::new(self.push_filter(*project_input, rewritten)?),
                    exprs,
                    schema,
                }),
                None => Ok(filter(
                    LogicalPlan::Project {
                        input: project_input,
                        exprs,
                        schema,
                    },
                    Some(predicate),
                )),
            },
            LogicalPlan::Sort { input, order_by } => Ok(LogicalPlan::Sort {
                input: Box::new(self.push_filter(*input, predicate)?),
                order_by,
            }),
            LogicalPlan::SubqueryAlias {
                input,
                alias,
                schema,
            } => {
                let inner_schema = input.schema().clone();
                match substitute(&predicate, &schema, |i| {
                    Some(Expr::Column(inner_schema.field(i).column()))
                })? {
                    Some(rewritten) => Ok(LogicalPlan::SubqueryAlias {
                        input: Box::new(self.push_filter(*input, rewritten)?),
                        alias,
                        schema,
                    }),
                    None => Ok(filter(
                        LogicalPlan::SubqueryAlias {
                            input,
                            alias,
                            schema,
                        },
                        Some(predicate),
                    )),
                }
            }
            LogicalPlan::Aggregate {
                input,
                group_by,
                aggregates,
                schema,
            } => {
                let mut below = Vec::new();
                let mut above = Vec::new();
                for conjunct in split_conjunction(predicate) {
                    // a constant filter decides whether a global aggregate emits its row
                    if conjunct.columns().is_empty() {
                        above.push(conjunct);
                        continue;
                    }
                    let rewritten = substitute(&conjunct, &schema, |i| group_by.get(i).cloned())?;
                    match rewritten {
                        Some(rewritten) => below.push(rewritten),
                        None => above.push(conjunct),
                    }
                }
                let input = match conjunction(below) {
                    Some(pushed) => self.push_filter(*input, pushed)?,
                    None => *input,
                };
                let aggregate = LogicalPlan::Aggregate {
                    input: Box::new(input),
                    group_by,
                    aggregates,
                    schema,
                };
                Ok(filter(aggregate, conjunction(above)))
            }
            LogicalPlan::Join {
                left,
                right,
                join_type,
                mut on,
                filter: mut join_filter,
                schema,
            } => {
                let mut to_left = Vec::new();
                let mut to_right = Vec::new();
                let mut above = Vec::new();
                for conjunct in split_conjunction(predicate) {
                    let columns = conjunct.columns();
                    let on_left = columns.iter().all(|c| left.schema().has_column(c));
                    let on_right = columns.iter().all(|c| right.schema().has_column(c));
                    if on_left && !join_type.preserves_right() {
                        to_left.push(conjunct);
                    } else if on_right && !join_type.preserves_left() {
                        to_right.push(conjunct);
                    } else if join_type == JoinType::Inner {
                        match equi_pair(&conjunct, left.schema(), right.schema())? {
                            Some(pair) => on.push(pair),
                            None => {
                                join_filter = Some(match join_filter {
                                    Some(existing) => existing.and(conjunct),
                                    None => conjunct,
                                });
                            }
                        }
                    } else {
                        above.push(conjunct);
                    }
                }
                let left = match conjunction(to_left) {
                    Some(pushed) => self.push_filter(*left, pushed)?,
                    None => *left,
                };
                let right = match conjunction(to_right) {
                    Some(pushed) => self.push_filter(*right, pushed)?,
                    None => *right,
                };
                let join = LogicalPlan::Join {
                    left: Box::new(left),
                    right: Box::new(right),
                    join_type,
                    on,
                    filter: join_filter,
                    schema,
                };
                Ok(filter(join, conjunction(above)))
            }
            // Limit and EmptyRelation change row sets; the filter stays above them
            other => Ok(filter(other, Some(predicate))),
        }
    }
}

fn filter(input: LogicalPlan, predicate: Option<Expr>) -> LogicalPlan {
    match predicate {
        Some(predicate) => LogicalPlan::Filter {
            input: Box::new(input),
            predicate,
        },
        None => input,
    }
}

/// Rewrite every column of `expr` (resolved against `schema`) with the
/// expression `replacement` gives for its index. `None` if any column has
/// no replacement.
fn substitute<F>(expr: &Expr, schema: &PlanSchema, replacement: F) -> FlintResult<Option<Expr>>
where
    F: Fn(usize) -> Option<Expr>,
{
    let mut complete = true;
    let rewritten = expr.clone().transform_down(&mut |e| match e {
        Expr::Column(column) => {
            let found = replacement(schema.index_of(column)?);
            complete &= found.is_some();
            Ok(Some(found.unwrap_or_else(|| e.clone())))
        }
        _ => Ok(None),
    })?;
    Ok(complete.then_some(rewritten))
}

/// `l = r` comparing a left-only expression with a right-only one of the same type.
fn equi_pair(
    expr: &Expr,
    left: &PlanSchema,
    right: &PlanSchema,
) -> FlintResult<Option<(Expr, Expr)>> {
    let Expr::BinaryOp {
        left: a,
        op: BinaryOperator::Eq,
        right: b,
    } = expr
    else {
        return Ok(None);
    };
    let within = |e: &Expr, schema: &PlanSchema| {
        let columns = e.columns();
        !columns.is_empty() && columns.iter().all(|c| schema.has_column(c))
    };
    let (l, r) = if within(a, left) && within(b, right) {
        (a.as_ref(), b.as_ref())
    } else if within(a, right) && within(b, left) {
        (b.as_ref(), a.as_ref())
    } else {
        return Ok(None);
    };
    if l.data_type(left)? != r.data_type(right)? {
        return Ok(None);
    }
    Ok(Some((l.clone(), r.clone())))
}
