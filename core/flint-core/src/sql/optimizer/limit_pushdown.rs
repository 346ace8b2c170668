//! Rule 4: Limit Pushdown
//!
//! LIMIT를 하위 노드에 적용하여 조기 종료

use crate::error::FlintResult;
use crate::sql::planner::LogicalPlan;

use super::{OptimizationRule, map_inputs};

/// LIMIT를 하위 노드에 적용하여 조기 종료
pub struct LimitPushdownRule;

impl OptimizationRule for LimitPushdownRule {
    fn name(&self) -> &str {
        "LimitPushdown"
    }

    fn apply(&self, plan: LogicalPlan) -> FlintResult<LogicalPlan> {
        self.push_down(plan)
    }
}

impl LimitPushdownRule {
    fn push_down(&self, plan: LogicalPlan) -> FlintResult<LogicalPlan> {
        match plan {
            LogicalPlan::Limit { input, skip, fetch } => {
                let optimized_input = self.push_down(*input)?;
                self.push_limit(optimized_input, skip, fetch)
            }
            other => map_inputs(other, |input| self.push_down(input)),
        }
    }

    fn push_limit(
        &self,
        input: LogicalPlan,
        skip: usize,
        fetch: Option<usize>,
    ) -> FlintResult<LogicalPlan> {
        match input {
            // projections are row-for-row
            LogicalPlan::Project {
                input: project_input,
                exprs,
                schema,
            } => Ok(LogicalPlan::Project {
                input: Box::new(self.push_limit(*project_input, skip, fetch)?),
                exprs,
                schema,
            }),
            LogicalPlan::SubqueryAlias {
                input,
                alias,
                schema,
            } => Ok(LogicalPlan::SubqueryAlias {
                input: Box::new(self.push_limit(*input, skip, fetch)?),
                alias,
                schema,
            }),
            LogicalPlan::Limit {
                input: inner_input,
                skip: inner_skip,
                fetch: inner_fetch,
            } => {
                // outer window applied to what the inner window lets through
                let inner_remaining = inner_fetch.map(|f| f.saturating_sub(skip));
                let final_fetch = match (fetch, inner_remaining) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                };
                self.push_limit(*inner_input, inner_skip.saturating_add(skip), final_fetch)
            }
            other => Ok(LogicalPlan::Limit {
                input: Box::new(other),
                skip,
                fetch,
            }),
        }
    }
}
