//! SQL 플래너 모듈
//!
//! AST → LogicalPlan → PhysicalPlan. Logical plans carry qualified schemas;
//! physical plans are index-resolved and ready for the executor.

pub mod expr;
pub mod logical;
pub mod physical;
pub mod schema;
pub mod types;

#[cfg(test)]
mod tests;

// Re-export main types
pub use expr::{conjunction, split_conjunction};
pub use logical::LogicalPlanner;
pub use physical::{PhysicalPlanner, create_physical_expr};
pub use schema::{Column, PlanField, PlanSchema, PlanSchemaRef};
pub use types::*;
