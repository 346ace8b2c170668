//! Sort Operator: ORDER BY clause handling

use crate::error::FlintResult;
use crate::sql::executor::memory::{MemoryPool, MemoryReservation};
use crate::sql::executor::operators::PhysicalOperator;
use crate::sql::executor::{concat_batches, evaluate_expr};
use crate::sql::planner::PhysicalSortExpr;
use arrow::array::{ArrayRef, UInt32Array};
use arrow::compute::{self, SortColumn, SortOptions};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use rayon::prelude::*;
use smallvec::{SmallVec, smallvec};
use std::sync::Arc;

/// Sort 연산자 (ORDER BY): Arrow lexsort_to_indices 활용, fetch가 있으면 top-k
pub struct SortOperator {
    input: Box<dyn PhysicalOperator>,
    order_by: Vec<PhysicalSortExpr>,
    fetch: Option<usize>,
    batch_size: usize,
    reservation: MemoryReservation,
    /// Materialized sorted result (sort requires all data)
    sorted: Option<RecordBatch>,
    offset: usize,
    materialized: bool,
}

impl SortOperator {
    pub fn new(
        input: Box<dyn PhysicalOperator>,
        order_by: Vec<PhysicalSortExpr>,
        fetch: Option<usize>,
        batch_size: usize,
        pool: &Arc<MemoryPool>,
    ) -> Self {
        Self {
            input,
            order_by,
            fetch,
            batch_size: batch_size.max(1),
            reservation: MemoryReservation::new(pool, "SortExec"),
            sorted: None,
            offset: 0,
            materialized: false,
        }
    }

    /// Materialize all input batches into one sorted RecordBatch.
    fn materialize(&mut self) -> FlintResult<()> {
        let mut batches: SmallVec<[RecordBatch; 8]> = smallvec![];
        while let Some(batch) = self.input.next()? {
            if batch.num_rows() > 0 {
                self.reservation.try_grow(batch.get_array_memory_size())?;
                batches.push(batch);
            }
        }
        if batches.is_empty() {
            return Ok(());
        }

        let schema = self.input.schema();
        let merged = if batches.len() == 1 {
            batches.swap_remove(0)
        } else {
            // 병합 중에는 입력과 복사본이 함께 살아 있다
            let input_bytes = self.reservation.size();
            self.reservation.try_grow(input_bytes)?;
            let merged = concat_batches(&schema, &batches)?;
            drop(batches);
            self.reservation.resize(merged.get_array_memory_size())?;
            merged
        };

        let sort_columns = self
            .order_by
            .iter()
            .map(|key| {
                Ok(SortColumn {
                    values: evaluate_expr(&key.expr, &merged)?,
                    options: Some(SortOptions {
                        descending: !key.asc,
                        nulls_first: key.nulls_first,
                    }),
                })
            })
            .collect::<FlintResult<Vec<_>>>()?;
        let indices = compute::lexsort_to_indices(&sort_columns, self.fetch)?;
        drop(sort_columns);

        let merged_bytes = merged.get_array_memory_size();
        let estimate = merged_bytes / merged.num_rows() * indices.len();
        self.reservation.try_grow(estimate)?;
        let sorted_columns = take_columns(&merged, &indices)?;
        drop(merged);

        let options = RecordBatchOptions::new().with_row_count(Some(indices.len()));
        let sorted = RecordBatch::try_new_with_options(schema, sorted_columns, &options)?;
        self.reservation.resize(sorted.get_array_memory_size())?;
        self.sorted = Some(sorted);
        Ok(())
    }
}

/// Rows below which columns are gathered on the calling thread.
const PARALLEL_TAKE_ROWS: usize = 64 * 1024;

fn parallel_take(rows: usize, columns: usize) -> bool {
    rows >= PARALLEL_TAKE_ROWS && columns > 1
}

fn take_columns(batch: &RecordBatch, indices: &UInt32Array) -> FlintResult<Vec<ArrayRef>> {
    let take = |col: &ArrayRef| compute::take(col.as_ref(), indices, None);
    let columns = if parallel_take(indices.len(), batch.num_columns()) {
        batch
            .columns()
            .par_iter()
            .map(take)
            .collect::<Result<_, _>>()?
    } else {
        batch.columns().iter().map(take).collect::<Result<_, _>>()?
    };
    Ok(columns)
}

impl PhysicalOperator for SortOperator {
    fn schema(&self) -> SchemaRef {
        self.input.schema()
    }

    fn next(&mut self) -> FlintResult<Option<RecordBatch>> {
        if !self.materialized {
            self.materialized = true;
            self.materialize()?;
        }
        let Some(sorted) = self.sorted.as_ref() else {
            return Ok(None);
        };
        if self.offset >= sorted.num_rows() {
            self.sorted = None;
            self.reservation.free();
            return Ok(None);
        }
        let len = self.batch_size.min(sorted.num_rows() - self.offset);
        let chunk = sorted.slice(self.offset, len);
        self.offset += len;
        Ok(Some(chunk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::sql::executor::operators::test_util::{MockOperator, int_batch, opt_values};
    use crate::sql::planner::PhysicalExpr;
    use arrow::array::Int64Array;

    fn key(asc: bool, nulls_first: bool) -> Vec<PhysicalSortExpr> {
        vec![PhysicalSortExpr {
            expr: PhysicalExpr::Column(0),
            asc,
            nulls_first,
        }]
    }

    fn with_nulls() -> RecordBatch {
        RecordBatch::try_new(
            int_batch(&[]).schema(),
            vec![Arc::new(Int64Array::from(vec![Some(3), None, Some(1), Some(2)]))],
        )
        .unwrap()
    }

    fn drain(op: &mut dyn PhysicalOperator) -> Vec<Option<i64>> {
        let mut out = Vec::new();
        while let Some(batch) = op.next().unwrap() {
            out.extend(opt_values(&batch, 0));
        }
        out
    }

    #[test]
    fn sorts_across_batches_with_null_placement() {
        let pool = Arc::new(MemoryPool::unbounded());
        let input = MockOperator::new(vec![with_nulls(), int_batch(&[0])]);
        let mut sort = SortOperator::new(Box::new(input), key(true, false), None, 2, &pool);
        assert_eq!(
            drain(&mut sort),
            vec![Some(0), Some(1), Some(2), Some(3), None]
        );

        let input = MockOperator::new(vec![with_nulls()]);
        let mut sort = SortOperator::new(Box::new(input), key(false, true), None, 10, &pool);
        assert_eq!(drain(&mut sort), vec![None, Some(3), Some(2), Some(1)]);
    }

    #[test]
    fn fetch_keeps_top_rows() {
        let pool = Arc::new(MemoryPool::unbounded());
        let input = MockOperator::new(vec![int_batch(&[5, 1, 4, 2, 3])]);
        let mut sort = SortOperator::new(Box::new(input), key(false, false), Some(2), 10, &pool);
        assert_eq!(drain(&mut sort), vec![Some(5), Some(4)]);
    }

    #[test]
    fn memory_limit_is_enforced() {
        let pool = Arc::new(MemoryPool::new(Some(16)));
        let input = MockOperator::new(vec![int_batch(&(0..1000).collect::<Vec<_>>())]);
        let mut sort = SortOperator::new(Box::new(input), key(true, true), None, 10, &pool);
        let err = sort.next().unwrap_err();
        assert_eq!(err.code(), ErrorCode::ResourcesExhausted);
    }

    #[test]
    fn reservation_released_after_drain() {
        let pool = Arc::new(MemoryPool::unbounded());
        let input = MockOperator::new(vec![int_batch(&[2, 1])]);
        let mut sort = SortOperator::new(Box::new(input), key(true, true), None, 10, &pool);
        drain(&mut sort);
        assert_eq!(pool.used(), 0);
    }

    #[test]
    fn merge_copy_is_charged() {
        let part = int_batch(&(0..1000).collect::<Vec<_>>());
        let per_batch = part.get_array_memory_size();

        // both inputs fit, inputs plus their concatenation do not
        let pool = Arc::new(MemoryPool::new(Some(3 * per_batch)));
        let input = MockOperator::new(vec![part.clone(), part.clone()]);
        let mut sort = SortOperator::new(Box::new(input), key(true, true), None, 10, &pool);
        let err = sort.next().unwrap_err();
        assert_eq!(err.code(), ErrorCode::ResourcesExhausted);

        let pool = Arc::new(MemoryPool::new(Some(4 * per_batch + 1024)));
        let input = MockOperator::new(vec![part.clone(), part]);
        let mut sort = SortOperator::new(Box::new(input), key(true, true), None, 10, &pool);
        assert!(sort.next().unwrap().is_some());
        assert!(pool.used() <= 4 * per_batch + 1024);
    }

    #[test]
    fn parallel_take_only_for_large_inputs() {
        assert!(!parallel_take(10, 4));
        assert!(!parallel_take(PARALLEL_TAKE_ROWS, 1));
        assert!(parallel_take(PARALLEL_TAKE_ROWS, 2));

        let rows = PARALLEL_TAKE_ROWS as i64 + 10;
        let keys: Vec<i64> = (0..rows).rev().collect();
        let schema = Arc::new(arrow::datatypes::Schema::new(vec![
            arrow::datatypes::Field::new("k", arrow::datatypes::DataType::Int64, false),
            arrow::datatypes::Field::new("v", arrow::datatypes::DataType::Int64, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(keys.clone())),
                Arc::new(Int64Array::from(keys)),
            ],
        )
        .unwrap();
        let pool = Arc::new(MemoryPool::unbounded());
        let input = MockOperator::new(vec![batch]);
        let mut sort = SortOperator::new(Box::new(input), key(true, true), None, 1 << 20, &pool);
        let out = sort.next().unwrap().unwrap();
        assert_eq!(out.num_rows(), rows as usize);
        assert_eq!(opt_values(&out, 1)[0], Some(0));
        assert_eq!(opt_values(&out, 1)[rows as usize - 1], Some(rows - 1));
    }
}
