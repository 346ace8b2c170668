//! Physical Operators Module

mod empty;
mod filter;
mod hash_aggregate;
mod join;
mod limit;
mod nested_loop_join;
mod physical_operator;
mod projection;
mod sort;
mod sort_merge_join;
mod table_scan;

pub use empty::EmptyOperator;
pub use filter::FilterOperator;
pub use hash_aggregate::HashAggregateOperator;
pub use join::HashJoinOperator;
pub use limit::LimitOperator;
pub use nested_loop_join::NestedLoopJoinOperator;
pub use physical_operator::PhysicalOperator;
pub use projection::ProjectionOperator;
pub use sort::SortOperator;
pub use sort_merge_join::SortMergeJoinOperator;
pub use table_scan::TableScanOperator;
