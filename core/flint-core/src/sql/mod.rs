// SQL 모듈 진입점
pub mod executor;
pub mod optimizer;
pub mod parser;
pub mod planner;

pub use executor::{
    EmptyOperator, ExecContext, FilterOperator, HashAggregateOperator, HashJoinOperator,
    LimitOperator, MemoryPool, MemoryReservation, NestedLoopJoinOperator, PhysicalOperator,
    ProjectionOperator, SortMergeJoinOperator, SortOperator, TableScanOperator, build_operator,
    evaluate_expr, execute,
};
pub use optimizer::{OptimizationRule, QueryOptimizer};
pub use parser::SqlParser;
pub use planner::{
    AggregateFunction, BinaryOperator, Column, Expr, JoinType, LogicalPlan, LogicalPlanner,
    PhysicalAggExpr, PhysicalExpr, PhysicalPlan, PhysicalPlanner, PlanSchema, ScalarFunction,
    SortExpr,
};
