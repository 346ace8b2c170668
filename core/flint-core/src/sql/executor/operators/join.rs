//! HashJoin Operator: Hash-based join implementation
//!
//! Also holds the pieces every join algorithm shares: materializing a side
//! under a memory reservation, encoding keys, and turning matched index pairs
//! into output batches with residual filtering and outer-join padding.

use crate::batch::rechunk;
use crate::error::FlintResult;
use crate::sql::executor::memory::{MemoryPool, MemoryReservation};
use crate::sql::executor::operators::PhysicalOperator;
use crate::sql::executor::{concat_batches, evaluate_expr, evaluate_predicate};
use crate::sql::planner::{JoinType, PhysicalExpr};
use ahash::AHashMap;
use arrow::array::{Array, ArrayRef, UInt32Array, new_null_array};
use arrow::compute;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use arrow::row::{RowConverter, Rows, SortField};
use smallvec::{SmallVec, smallvec};
use std::collections::VecDeque;
use std::sync::Arc;

/// Hash Join 연산자: build from right, probe from left
pub struct HashJoinOperator {
    left: Box<dyn PhysicalOperator>,
    right: Box<dyn PhysicalOperator>,
    /// (left key, right key) pairs; both sides of a pair share a type
    on: Vec<(PhysicalExpr, PhysicalExpr)>,
    output: JoinOutput,
    batch_size: usize,
    reservation: MemoryReservation,
    /// Build phase result, set on the first `next()`
    build: Option<BuildSide>,
    queue: VecDeque<RecordBatch>,
    probe_done: bool,
}

struct BuildSide {
    batch: RecordBatch,
    converter: RowConverter,
    /// Encoded key → build row indices; rows with a NULL key are left out
    table: AHashMap<Box<[u8]>, SmallVec<[u32; 2]>>,
}

impl HashJoinOperator {
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
            reservation: MemoryReservation::new(pool, "HashJoinExec"),
            build: None,
            queue: VecDeque::new(),
            probe_done: false,
        }
    }

    fn build_phase(&mut self) -> FlintResult<BuildSide> {
        let batch = collect_side(self.right.as_mut(), &mut self.reservation)?;
        let right_keys: Vec<PhysicalExpr> = self.on.iter().map(|(_, r)| r.clone()).collect();
        let (converter, rows, valid) = encode_keys(&right_keys, &batch)?;

        let mut table: AHashMap<Box<[u8]>, SmallVec<[u32; 2]>> = AHashMap::new();
        for (idx, row) in rows.iter().enumerate() {
            if !valid[idx] {
                continue;
            }
            match table.get_mut(row.as_ref()) {
                Some(matches) => matches.push(idx as u32),
                None => {
                    table.insert(Box::from(row.as_ref()), smallvec![idx as u32]);
                }
            }
        }
        let entry = std::mem::size_of::<(Box<[u8]>, SmallVec<[u32; 2]>)>();
        self.reservation
            .try_grow(rows.size() * 2 + table.capacity() * entry)?;
        self.output.init_visited(batch.num_rows());
        Ok(BuildSide {
            batch,
            converter,
            table,
        })
    }

    fn probe(&mut self, build: &BuildSide, probe: &RecordBatch) -> FlintResult<()> {
        let arrays = self
            .on
            .iter()
            .map(|(l, _)| evaluate_expr(l, probe))
            .collect::<FlintResult<Vec<_>>>()?;
        let rows = build.converter.convert_columns(&arrays)?;
        let valid = all_valid(&arrays, probe.num_rows());

        let mut left_idx = Vec::new();
        let mut right_idx = Vec::new();
        for (i, row) in rows.iter().enumerate() {
            if !valid[i] {
                continue;
            }
            if let Some(matches) = build.table.get(row.as_ref()) {
                for &j in matches {
                    left_idx.push(i as u32);
                    right_idx.push(j);
                }
            }
        }
        let out = self
            .output
            .probe_result(probe, &build.batch, left_idx, right_idx)?;
        self.queue.extend(rechunk(vec![out], self.batch_size));
        Ok(())
    }
}

impl PhysicalOperator for HashJoinOperator {
    fn schema(&self) -> SchemaRef {
        self.output.schema()
    }

    fn next(&mut self) -> FlintResult<Option<RecordBatch>> {
        if self.build.is_none() {
            self.build = Some(self.build_phase()?);
        }
        loop {
            if let Some(batch) = self.queue.pop_front() {
                return Ok(Some(batch));
            }
            if self.probe_done {
                return Ok(None);
            }
            let Some(build) = self.build.take() else {
                return Ok(None);
            };
            let step = match self.left.next() {
                Ok(Some(batch)) => self.probe(&build, &batch),
                Ok(None) => {
                    self.probe_done = true;
                    self.output.right_unmatched(&build.batch).map(|out| {
                        if let Some(out) = out {
                            self.queue.extend(rechunk(vec![out], self.batch_size));
                        }
                    })
                }
                Err(e) => Err(e),
            };
            self.build = Some(build);
            step?;
        }
    }
}

/// Drain an operator into one batch, charging the reservation.
pub(super) fn collect_side(
    input: &mut dyn PhysicalOperator,
    reservation: &mut MemoryReservation,
) -> FlintResult<RecordBatch> {
    let schema = input.schema();
    let mut batches: SmallVec<[RecordBatch; 8]> = smallvec![];
    while let Some(batch) = input.next()? {
        if batch.num_rows() > 0 {
            reservation.try_grow(batch.get_array_memory_size())?;
            batches.push(batch);
        }
    }
    if batches.is_empty() {
        return Ok(RecordBatch::new_empty(schema));
    }
    concat_batches(&schema, &batches)
}

/// Evaluate key expressions and encode them in the row format. Also returns,
/// per row, whether every key column is non-null.
pub(super) fn encode_keys(
    keys: &[PhysicalExpr],
    batch: &RecordBatch,
) -> FlintResult<(RowConverter, Rows, Vec<bool>)> {
    let arrays = keys
        .iter()
        .map(|k| evaluate_expr(k, batch))
        .collect::<FlintResult<Vec<_>>>()?;
    let fields = arrays
        .iter()
        .map(|a| SortField::new(a.data_type().clone()))
        .collect();
    let converter = RowConverter::new(fields)?;
    let rows = converter.convert_columns(&arrays)?;
    let valid = all_valid(&arrays, batch.num_rows());
    Ok((converter, rows, valid))
}

/// NULL never equals anything, so rows with a NULL key never match.
pub(super) fn all_valid(arrays: &[ArrayRef], num_rows: usize) -> Vec<bool> {
    (0..num_rows)
        .map(|i| arrays.iter().all(|a| a.is_valid(i)))
        .collect()
}

/// Output assembly shared by the join operators.
///
/// The left input is streamed (or, for sort-merge, fully materialized) and
/// the right input is held in one batch; `visited` tracks which right rows
/// matched for right/full joins.
pub(super) struct JoinOutput {
    schema: SchemaRef,
    join_type: JoinType,
    filter: Option<PhysicalExpr>,
    left_width: usize,
    visited: Vec<bool>,
}

impl JoinOutput {
    pub(super) fn new(
        schema: SchemaRef,
        join_type: JoinType,
        filter: Option<PhysicalExpr>,
        left_width: usize,
    ) -> Self {
        Self {
            schema,
            join_type,
            filter,
            left_width,
            visited: Vec::new(),
        }
    }

    pub(super) fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    pub(super) fn init_visited(&mut self, right_rows: usize) {
        if self.join_type.preserves_right() {
            self.visited = vec![false; right_rows];
        }
    }

    /// Output for one left batch given its candidate key matches: applies the
    /// residual filter, records matched right rows, and pads unmatched left
    /// rows when the join preserves the left side.
    pub(super) fn probe_result(
        &mut self,
        left: &RecordBatch,
        right: &RecordBatch,
        mut left_idx: Vec<u32>,
        mut right_idx: Vec<u32>,
    ) -> FlintResult<RecordBatch> {
        if let Some(filter) = &self.filter {
            let candidates = self.build_batch(
                left,
                &UInt32Array::from(left_idx.clone()),
                right,
                &UInt32Array::from(right_idx.clone()),
            )?;
            let mask = evaluate_predicate(filter, &candidates)?;
            let keep = |i: usize| mask.is_valid(i) && mask.value(i);
            left_idx = keep_where(left_idx, keep);
            right_idx = keep_where(right_idx, keep);
        }

        if self.join_type.preserves_right() {
            for j in &right_idx {
                self.visited[*j as usize] = true;
            }
        }

        let mut left_out: Vec<Option<u32>> = left_idx.iter().copied().map(Some).collect();
        let mut right_out: Vec<Option<u32>> = right_idx.into_iter().map(Some).collect();
        if self.join_type.preserves_left() {
            let mut matched = vec![false; left.num_rows()];
            for i in &left_idx {
                matched[*i as usize] = true;
            }
            for (i, _) in matched.iter().enumerate().filter(|(_, m)| !**m) {
                left_out.push(Some(i as u32));
                right_out.push(None);
            }
        }

        self.build_batch(
            left,
            &UInt32Array::from(left_out),
            right,
            &UInt32Array::from(right_out),
        )
    }

    /// Right rows that never matched, padded with NULL left columns.
    pub(super) fn right_unmatched(&self, right: &RecordBatch) -> FlintResult<Option<RecordBatch>> {
        if !self.join_type.preserves_right() {
            return Ok(None);
        }
        let unmatched: Vec<u32> = self
            .visited
            .iter()
            .enumerate()
            .filter(|(_, seen)| !**seen)
            .map(|(j, _)| j as u32)
            .collect();
        if unmatched.is_empty() {
            return Ok(None);
        }
        let len = unmatched.len();
        let right_idx = UInt32Array::from(unmatched);
        let mut columns: Vec<ArrayRef> = self.schema.fields()[..self.left_width]
            .iter()
            .map(|f| new_null_array(f.data_type(), len))
            .collect();
        columns.extend(take_all(right, &right_idx)?);
        let options = RecordBatchOptions::new().with_row_count(Some(len));
        Ok(Some(RecordBatch::try_new_with_options(Arc::clone(&self.schema), columns, &options)?))
    }

    fn build_batch(
        &self,
        left: &RecordBatch,
        left_idx: &UInt32Array,
        right: &RecordBatch,
        right_idx: &UInt32Array,
    ) -> FlintResult<RecordBatch> {
        let mut columns = take_all(left, left_idx)?;
        columns.extend(take_all(right, right_idx)?);
        let options = RecordBatchOptions::new().with_row_count(Some(left_idx.len()));
        Ok(RecordBatch::try_new_with_options(Arc::clone(&self.schema), columns, &options)?)
    }
}

fn keep_where(indices: Vec<u32>, keep: impl Fn(usize) -> bool) -> Vec<u32> {
    indices
        .into_iter()
        .enumerate()
        .filter(|(i, _)| keep(*i))
        .map(|(_, v)| v)
        .collect()
}

fn take_all(batch: &RecordBatch, indices: &UInt32Array) -> FlintResult<Vec<ArrayRef>> {
    Ok(batch
        .columns()
        .iter()
        .map(|c| compute::take(c.as_ref(), indices, None))
        .collect::<Result<_, _>>()?)
}
