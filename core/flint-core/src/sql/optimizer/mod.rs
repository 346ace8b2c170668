//! SQL 쿼리 옵티마이저: 규칙 기반 최적화
//!
//! LogicalPlan을 최적화하여 실행 성능을 향상시킵니다.
//! 4가지 핵심 규칙: PredicatePushdown, ProjectionPushdown, ConstantFolding, LimitPushdown
//!
//! Rules run in that order, repeatedly, until the plan stops changing or
//! `max_passes` is reached. Every rule preserves the output schema.

mod constant_folding;
mod limit_pushdown;
mod predicate_pushdown;
mod projection_pushdown;


use crate::config::OptimizerConfig;
use crate::error::FlintResult;
use crate::sql::planner::LogicalPlan;
use tracing::debug;

pub use constant_folding::ConstantFoldingRule;
pub use limit_pushdown::LimitPushdownRule;
pub use predicate_pushdown::PredicatePushdownRule;
pub use projection_pushdown::ProjectionPushdownRule;

/// 최적화 규칙 트레이트
pub trait OptimizationRule: Send + Sync {
    /// 규칙 이름
    fn name(&self) -> &str;

    /// LogicalPlan에 규칙 적용
    fn apply(&self, plan: LogicalPlan) -> FlintResult<LogicalPlan>;
}

/// 쿼리 옵티마이저
pub struct QueryOptimizer {
    rules: Vec<Box<dyn OptimizationRule>>,
    max_passes: usize,
}

impl QueryOptimizer {
    /// Rules enabled by `config`; a disabled optimizer has none.
    pub fn new(config: &OptimizerConfig) -> Self {
        let mut rules: Vec<Box<dyn OptimizationRule>> = Vec::new();
        if config.enabled {
            if config.predicate_pushdown {
                rules.push(Box::new(PredicatePushdownRule));
            }
            if config.projection_pruning {
                rules.push(Box::new(ProjectionPushdownRule));
            }
            if config.constant_folding {
                rules.push(Box::new(ConstantFoldingRule));
            }
            if config.limit_pushdown {
                rules.push(Box::new(LimitPushdownRule));
            }
        }
        Self {
            rules,
            max_passes: config.max_passes,
        }
    }

    /// Custom rule list, applied in order.
    pub fn with_rules(rules: Vec<Box<dyn OptimizationRule>>, max_passes: usize) -> Self {
        Self { rules, max_passes }
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// 모든 규칙 적용
    pub fn optimize(&self, plan: LogicalPlan) -> FlintResult<LogicalPlan> {
        let mut optimized = plan;
        for pass in 0..self.max_passes {
            let before = optimized.clone();
            for rule in &self.rules {
                optimized = rule.apply(optimized)?;
                debug!(target: "flint::optimizer", pass, rule = rule.name(), "applied rule");
            }
            if optimized == before {
                debug!(target: "flint::optimizer", passes = pass + 1, "reached fixed point");
                break;
            }
        }
        Ok(optimized)
    }
}

impl Default for QueryOptimizer {
    fn default() -> Self {
        Self::new(&OptimizerConfig::default())
    }
}

/// Rebuild `plan` with `f` applied to each direct input. Node schemas are
/// kept, so `f` must preserve the schema of the input it rewrites.
pub(crate) fn map_inputs<F>(plan: LogicalPlan, mut f: F) -> FlintResult<LogicalPlan>
where
    F: FnMut(LogicalPlan) -> FlintResult<LogicalPlan>,
{
    let mut boxed = |input: Box<LogicalPlan>| f(*input).map(Box::new);
    Ok(match plan {
        LogicalPlan::Project {
            input,
            exprs,
            schema,
        } => LogicalPlan::Project {
            input: boxed(input)?,
            exprs,
            schema,
        },
        LogicalPlan::Filter { input, predicate } => LogicalPlan::Filter {
            input: boxed(input)?,
            predicate,
        },
        LogicalPlan::Aggregate {
            input,
            group_by,
            aggregates,
            schema,
        } => LogicalPlan::Aggregate {
            input: boxed(input)?,
            group_by,
            aggregates,
            schema,
        },
        LogicalPlan::Join {
            left,
            right,
            join_type,
            on,
            filter,
            schema,
        } => LogicalPlan::Join {
            left: boxed(left)?,
            right: boxed(right)?,
            join_type,
            on,
            filter,
            schema,
        },
        LogicalPlan::Sort { input, order_by } => LogicalPlan::Sort {
            input: boxed(input)?,
            order_by,
        },
        LogicalPlan::Limit { input, skip, fetch } => LogicalPlan::Limit {
            input: boxed(input)?,
            skip,
            fetch,
        },
        LogicalPlan::SubqueryAlias {
            input,
            alias,
            schema,
        } => LogicalPlan::SubqueryAlias {
            input: boxed(input)?,
            alias,
            schema,
        },
        leaf @ (LogicalPlan::Scan { .. } | LogicalPlan::EmptyRelation { .. }) => leaf,
    })
}
