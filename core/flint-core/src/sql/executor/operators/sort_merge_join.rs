//! Sort-Merge Join Operator

use super::join::{JoinOutput, all_valid, collect_side, encode_keys};
use crate::batch::rechunk;
use crate::error::FlintResult;
use crate::sql::executor::memory::{MemoryPool, MemoryReservation};
use crate::sql::executor::evaluate_expr;
use crate::sql::executor::operators::PhysicalOperator;
use crate::sql::planner::{JoinType, PhysicalExpr};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use arrow::row::{RowConverter, Rows};
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;

/// Sort-Merge Join 연산자: 양쪽을 키 순서로 정렬 후 병합
///
/// Both inputs are materialized. Matched rows come out in ascending key order.
pub struct SortMergeJoinOperator {
    left: Box<dyn PhysicalOperator>,
    right: Box<dyn PhysicalOperator>,
    on: Vec<(PhysicalExpr, PhysicalExpr)>,
    output: JoinOutput,
    batch_size: usize,
    reservation: MemoryReservation,
    queue: VecDeque<RecordBatch>,
    joined: bool,
}

impl SortMergeJoinOperator {
    pub fn new(
        left: Box<dyn PhysicalOperator>,
        right: Box<dyn PhysicalOperator>,
        on: Vec<(PhysicalExpr, PhysicalExpr)>,
        filter: Option<PhysicalExpr>,
        join_type: JoinType,
        schema: SchemaRef,
        batch_size: usize,
        pool: &Arc<MemoryPool>,
    ) -> Self {
        let left_width = left.schema().fields().len();
        Self {
            left,
            right,
            on,
            output: JoinOutput::new(schema, join_type, filter, left_width),
            batch_size: batch_size.max(1),
            reservation: MemoryReservation::new(pool, "SortMergeJoinExec"),
            queue: VecDeque::new(),
            joined: false,
        }
    }

    fn join(&mut self) -> FlintResult<()> {
        let left = collect_side(self.left.as_mut(), &mut self.reservation)?;
        let right = collect_side(self.right.as_mut(), &mut self.reservation)?;

        let left_keys: Vec<PhysicalExpr> = self.on.iter().map(|(l, _)| l.clone()).collect();
        let right_keys: Vec<PhysicalExpr> = self.on.iter().map(|(_, r)| r.clone()).collect();
        let (converter, right_rows, right_valid) = encode_keys(&right_keys, &right)?;
        let (left_rows, left_valid) = encode_with(&converter, &left_keys, &left)?;
        self.reservation
            .try_grow(left_rows.size() + right_rows.size())?;

        let left_order = sorted_valid(&left_rows, &left_valid);
        let right_order = sorted_valid(&right_rows, &right_valid);

        let mut left_idx = Vec::new();
        let mut right_idx = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < left_order.len() && j < right_order.len() {
            let l = left_rows.row(left_order[i]);
            let r = right_rows.row(right_order[j]);
            match l.cmp(&r) {
                Ordering::Less => i += 1,
                Ordering::Greater => j += 1,
                Ordering::Equal => {
                    let i_end = run_end(&left_rows, &left_order, i);
                    let j_end = run_end(&right_rows, &right_order, j);
                    for &li in &left_order[i..i_end] {
                        for &rj in &right_order[j..j_end] {
                            left_idx.push(li as u32);
                            right_idx.push(rj as u32);
                        }
                    }
                    i = i_end;
                    j = j_end;
                }
            }
        }

        self.output.init_visited(right.num_rows());
        let matched = self
            .output
            .probe_result(&left, &right, left_idx, right_idx)?;
        let mut out = vec![matched];
        out.extend(self.output.right_unmatched(&right)?);
        self.queue.extend(rechunk(out, self.batch_size));
        Ok(())
    }
}

impl PhysicalOperator for SortMergeJoinOperator {
    fn schema(&self) -> SchemaRef {
        self.output.schema()
    }

    fn next(&mut self) -> FlintResult<Option<RecordBatch>> {
        if !self.joined {
            self.joined = true;
            self.join()?;
        }
        let batch = self.queue.pop_front();
        if self.queue.is_empty() {
            self.reservation.free();
        }
        Ok(batch)
    }
}

/// Encode the left keys with the right side's converter so rows compare.
fn encode_with(
    converter: &RowConverter,
    keys: &[PhysicalExpr],
    batch: &RecordBatch,
) -> FlintResult<(Rows, Vec<bool>)> {
    let arrays = keys
        .iter()
        .map(|k| evaluate_expr(k, batch))
        .collect::<FlintResult<Vec<_>>>()?;
    let rows = converter.convert_columns(&arrays)?;
    Ok((rows, all_valid(&arrays, batch.num_rows())))
}

/// Row indices with non-null keys, ordered by key.
fn sorted_valid(rows: &Rows, valid: &[bool]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..rows.num_rows()).filter(|i| valid[*i]).collect();
    order.sort_by(|a, b| rows.row(*a).cmp(&rows.row(*b)));
    order
}

/// End of the run of equal keys starting at `start`.
fn run_end(rows: &Rows, order: &[usize], start: usize) -> usize {
    let key = rows.row(order[start]);
    let mut end = start + 1;
    while end < order.len() && rows.row(order[end]) == key {
        end += 1;
    }
    end
}
