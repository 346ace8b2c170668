//! Nested Loop Join Operator: joins without equi keys

use super::join::{JoinOutput, collect_side};
use crate::batch::rechunk;
use crate::error::FlintResult;
use crate::sql::executor::memory::{MemoryPool, MemoryReservation};
use crate::sql::executor::operators::PhysicalOperator;
use crate::sql::planner::{JoinType, PhysicalExpr};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use std::collections::VecDeque;
use std::sync::Arc;

/// Nested Loop Join 연산자: 오른쪽을 메모리에 두고 왼쪽 행마다 전체 비교
///
/// Used for cross joins and joins whose condition has no equality between
/// the two sides.
pub struct NestedLoopJoinOperator {
    left: Box<dyn PhysicalOperator>,
    right: Box<dyn PhysicalOperator>,
    output: JoinOutput,
    batch_size: usize,
    reservation: MemoryReservation,
    inner: Option<RecordBatch>,
    queue: VecDeque<RecordBatch>,
    probe_done: bool,
}

impl NestedLoopJoinOperator {
    pub fn new(
        left: Box<dyn PhysicalOperator>,
        right: Box<dyn PhysicalOperator>,
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
            output: JoinOutput::new(schema, join_type, filter, left_width),
            batch_size: batch_size.max(1),
            reservation: MemoryReservation::new(pool, "NestedLoopJoinExec"),
            inner: None,
            queue: VecDeque::new(),
            probe_done: false,
        }
    }

    /// Pair every row of `outer` with every inner row, a window of outer
    /// rows at a time so candidate batches stay near `batch_size`.
    fn probe(&mut self, inner: &RecordBatch, outer: &RecordBatch) -> FlintResult<()> {
        let inner_rows = inner.num_rows();
        let window = (self.batch_size / inner_rows.max(1)).max(1);
        let mut start = 0;
        while start < outer.num_rows() {
            let len = window.min(outer.num_rows() - start);
            let slice = outer.slice(start, len);
            let mut left_idx = Vec::with_capacity(len * inner_rows);
            let mut right_idx = Vec::with_capacity(len * inner_rows);
            for i in 0..len as u32 {
                for j in 0..inner_rows as u32 {
                    left_idx.push(i);
                    right_idx.push(j);
                }
            }
            let out = self
                .output
                .probe_result(&slice, inner, left_idx, right_idx)?;
            self.queue.extend(rechunk(vec![out], self.batch_size));
            start += len;
        }
        Ok(())
    }
}

impl PhysicalOperator for NestedLoopJoinOperator {
    fn schema(&self) -> SchemaRef {
        self.output.schema()
    }

    fn next(&mut self) -> FlintResult<Option<RecordBatch>> {
        if self.inner.is_none() {
            let inner = collect_side(self.right.as_mut(), &mut self.reservation)?;
            self.output.init_visited(inner.num_rows());
            self.inner = Some(inner);
        }
        loop {
            if let Some(batch) = self.queue.pop_front() {
                return Ok(Some(batch));
            }
            if self.probe_done {
                return Ok(None);
            }
            let Some(inner) = self.inner.take() else {
                return Ok(None);
            };
            let step = match self.left.next() {
                Ok(Some(outer)) => self.probe(&inner, &outer),
                Ok(None) => {
                    self.probe_done = true;
                    self.output.right_unmatched(&inner).map(|out| {
                        if let Some(out) = out {
                            self.queue.extend(rechunk(vec![out], self.batch_size));
                        }
                    })
                }
                Err(e) => Err(e),
            };
            self.inner = Some(inner);
            step?;
        }
    }
}
