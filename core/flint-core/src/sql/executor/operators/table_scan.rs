//! Table Scan Operator: reads batches from a catalog source

use crate::catalog::{BatchStream, TableSource};
use crate::error::FlintResult;
use crate::sql::executor::operators::PhysicalOperator;
use crate::sql::executor::with_schema;
use crate::sql::planner::Expr;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use std::sync::Arc;
use tracing::trace;

/// 테이블 스캔 연산자: 소스 스트림을 batch_size 단위로 잘라 반환
pub struct TableScanOperator {
    table: String,
    source: Arc<dyn TableSource>,
    projection: Option<Vec<usize>>,
    filter_hint: Vec<Expr>,
    schema: SchemaRef,
    batch_size: usize,
    /// Opened on the first `next()`
    stream: Option<BatchStream>,
    /// Remainder of a source batch larger than `batch_size`
    pending: Option<RecordBatch>,
    exhausted: bool,
}

impl TableScanOperator {
    pub fn new(
        table: impl Into<String>,
        source: Arc<dyn TableSource>,
        projection: Option<Vec<usize>>,
        filter_hint: Vec<Expr>,
        schema: SchemaRef,
        batch_size: usize,
    ) -> Self {
        Self {
            table: table.into(),
            source,
            projection,
            filter_hint,
            schema,
            batch_size: batch_size.max(1),
            stream: None,
            pending: None,
            exhausted: false,
        }
    }

    fn split(&mut self, batch: RecordBatch) -> RecordBatch {
        if batch.num_rows() <= self.batch_size {
            return batch;
        }
        let head = batch.slice(0, self.batch_size);
        self.pending = Some(batch.slice(self.batch_size, batch.num_rows() - self.batch_size));
        head
    }
}

impl PhysicalOperator for TableScanOperator {
    fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    fn next(&mut self) -> FlintResult<Option<RecordBatch>> {
        if let Some(batch) = self.pending.take() {
            return Ok(Some(self.split(batch)));
        }
        if self.exhausted {
            return Ok(None);
        }
        if self.stream.is_none() {
            trace!(target: "flint::exec", table = %self.table, "opening scan");
            self.stream = Some(self.source.scan(
                self.projection.as_deref(),
                &self.filter_hint,
                self.batch_size,
            )?);
        }
        let Some(stream) = self.stream.as_mut() else {
            return Ok(None);
        };
        loop {
            match stream.next() {
                None => {
                    self.exhausted = true;
                    self.stream = None;
                    return Ok(None);
                }
                Some(Err(e)) => {
                    self.exhausted = true;
                    self.stream = None;
                    return Err(e);
                }
                Some(Ok(batch)) if batch.num_rows() == 0 => continue,
                Some(Ok(batch)) => {
                    let batch = with_schema(&batch, &self.schema)?;
                    return Ok(Some(self.split(batch)));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemTable;
    use arrow::array::Int32Array;
    use arrow::datatypes::{DataType, Field, Schema};

    fn source(rows: i32) -> Arc<dyn TableSource> {
        let schema = Arc::new(Schema::new(vec![
            Field::new("a", DataType::Int32, false),
            Field::new("b", DataType::Int32, false),
        ]));
        let batch = RecordBatch::try_new(
            Arc::clone(&schema),
            vec![
                Arc::new(Int32Array::from_iter_values(0..rows)),
                Arc::new(Int32Array::from_iter_values((0..rows).map(|v| v * 10))),
            ],
        )
        .unwrap();
        Arc::new(MemTable::try_new(schema, vec![batch]).unwrap())
    }

    #[test]
    fn batches_never_exceed_batch_size() {
        let table = source(10);
        let mut scan =
            TableScanOperator::new("t", Arc::clone(&table), None, vec![], table.schema(), 4);
        let mut sizes = Vec::new();
        while let Some(batch) = scan.next().unwrap() {
            sizes.push(batch.num_rows());
        }
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[test]
    fn output_carries_planned_schema() {
        let table = source(3);
        let planned = Arc::new(Schema::new(vec![Field::new("b", DataType::Int32, true)]));
        let mut scan =
            TableScanOperator::new("t", table, Some(vec![1]), vec![], Arc::clone(&planned), 100);
        let batch = scan.next().unwrap().unwrap();
        assert_eq!(batch.schema(), planned);
        assert!(scan.next().unwrap().is_none());
    }
}
