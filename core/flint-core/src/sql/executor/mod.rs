//! SQL Query Executor Module
//!
//! Turns a [`PhysicalPlan`] into a tree of pull-based operators and drains it.

use crate::config::SessionConfig;
use crate::error::FlintResult;
use arrow::compute;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use std::sync::Arc;
use tracing::{debug, trace};

pub mod expr;
pub mod memory;
pub mod operators;

pub use expr::{evaluate_expr, evaluate_predicate};
pub use memory::{MemoryPool, MemoryReservation};
pub use operators::{
    EmptyOperator, FilterOperator, HashAggregateOperator, HashJoinOperator, LimitOperator,
    NestedLoopJoinOperator, PhysicalOperator, ProjectionOperator, SortMergeJoinOperator,
    SortOperator, TableScanOperator,
};

use crate::sql::planner::PhysicalPlan;

/// State shared by the operators of one execution.
#[derive(Debug, Clone)]
pub struct ExecContext {
    pub batch_size: usize,
    pub memory: Arc<MemoryPool>,
}

impl ExecContext {
    /// Fresh memory pool sized from the configuration.
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            memory: Arc::new(MemoryPool::new(config.memory_limit)),
        }
    }
}

/// Build the operator tree for `plan`.
pub fn build_operator(
    plan: &PhysicalPlan,
    ctx: &ExecContext,
) -> FlintResult<Box<dyn PhysicalOperator>> {
    let op: Box<dyn PhysicalOperator> = match plan {
        PhysicalPlan::TableScan {
            table,
            source,
            projection,
            filter_hint,
            schema,
        } => Box::new(TableScanOperator::new(
            table.clone(),
            Arc::clone(source),
            projection.clone(),
            filter_hint.clone(),
            Arc::clone(schema),
            ctx.batch_size,
        )),
        PhysicalPlan::Filter { input, predicate } => Box::new(FilterOperator::new(
            build_operator(input, ctx)?,
            predicate.clone(),
        )),
        PhysicalPlan::Projection {
            input,
            exprs,
            schema,
        } => Box::new(ProjectionOperator::new(
            build_operator(input, ctx)?,
            exprs.clone(),
            Arc::clone(schema),
        )),
        PhysicalPlan::HashAggregate {
            input,
            group_by,
            aggregates,
            schema,
        } => Box::new(HashAggregateOperator::new(
            build_operator(input, ctx)?,
            group_by.clone(),
            aggregates.clone(),
            Arc::clone(schema),
            ctx.batch_size,
            &ctx.memory,
        )),
        PhysicalPlan::HashJoin {
            left,
            right,
            on,
            filter,
            join_type,
            schema,
        } => Box::new(HashJoinOperator::new(
            build_operator(left, ctx)?,
            build_operator(right, ctx)?,
            on.clone(),
            filter.clone(),
            *join_type,
            Arc::clone(schema),
            ctx.batch_size,
            &ctx.memory,
        )),
        PhysicalPlan::SortMergeJoin {
            left,
            right,
            on,
            filter,
            join_type,
            schema,
        } => Box::new(SortMergeJoinOperator::new(
            build_operator(left, ctx)?,
            build_operator(right, ctx)?,
            on.clone(),
            filter.clone(),
            *join_type,
            Arc::clone(schema),
            ctx.batch_size,
            &ctx.memory,
        )),
        PhysicalPlan::NestedLoopJoin {
            left,
            right,
            filter,
            join_type,
            schema,
        } => Box::new(NestedLoopJoinOperator::new(
            build_operator(left, ctx)?,
            build_operator(right, ctx)?,
            filter.clone(),
            *join_type,
            Arc::clone(schema),
            ctx.batch_size,
            &ctx.memory,
        )),
        PhysicalPlan::Sort {
            input,
            order_by,
            fetch,
        } => Box::new(SortOperator::new(
            build_operator(input, ctx)?,
            order_by.clone(),
            *fetch,
            ctx.batch_size,
            &ctx.memory,
        )),
        PhysicalPlan::Limit { input, skip, fetch } => Box::new(LimitOperator::new(
            build_operator(input, ctx)?,
            *skip,
            *fetch,
        )),
        PhysicalPlan::Empty {
            produce_one_row,
            schema,
        } => Box::new(EmptyOperator::new(*produce_one_row, Arc::clone(schema))),
    };
    Ok(op)
}

/// Execute `plan` to completion.
pub fn execute(plan: &PhysicalPlan, ctx: &ExecContext) -> FlintResult<Vec<RecordBatch>> {
    debug!(target: "flint::exec", tables = ?plan.tables(), "executing plan");
    let mut root = build_operator(plan, ctx)?;
    collect(root.as_mut())
}

/// Pull every batch out of an operator tree.
pub fn collect(op: &mut dyn PhysicalOperator) -> FlintResult<Vec<RecordBatch>> {
    let mut batches = Vec::new();
    while let Some(batch) = op.next()? {
        trace!(target: "flint::exec", rows = batch.num_rows(), "batch");
        batches.push(batch);
    }
    Ok(batches)
}

// Helper function for concatenating RecordBatches
pub fn concat_batches(schema: &SchemaRef, batches: &[RecordBatch]) -> FlintResult<RecordBatch> {
    if batches.len() == 1 {
        return Ok(batches[0].clone());
    }
    Ok(compute::concat_batches(schema, batches)?)
}

/// Re-label a batch with `schema`; column types must already match.
pub(crate) fn with_schema(batch: &RecordBatch, schema: &SchemaRef) -> FlintResult<RecordBatch> {
    if batch.schema() == *schema {
        return Ok(batch.clone());
    }
    let options = RecordBatchOptions::new().with_row_count(Some(batch.num_rows()));
    Ok(RecordBatch::try_new_with_options(Arc::clone(schema), batch.columns().to_vec(), &options)?)
}
