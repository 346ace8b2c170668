//! Empty Operator: input for queries without a FROM clause

use crate::error::FlintResult;
use crate::sql::executor::operators::PhysicalOperator;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use std::sync::Arc;

/// 빈 연산자: 0행 또는 컬럼 없는 1행 반환
pub struct EmptyOperator {
    schema: SchemaRef,
    produce_one_row: bool,
    done: bool,
}

impl EmptyOperator {
    pub fn new(produce_one_row: bool, schema: SchemaRef) -> Self {
        Self {
            schema,
            produce_one_row,
            done: false,
        }
    }
}

impl PhysicalOperator for EmptyOperator {
    fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    fn next(&mut self) -> FlintResult<Option<RecordBatch>> {
        if self.done || !self.produce_one_row {
            return Ok(None);
        }
        self.done = true;
        let options = RecordBatchOptions::new().with_row_count(Some(1));
        Ok(Some(RecordBatch::try_new_with_options(Arc::clone(&self.schema), vec![], &options)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::Schema;

    #[test]
    fn one_row_then_done() {
        let mut op = EmptyOperator::new(true, Arc::new(Schema::empty()));
        assert_eq!(op.next().unwrap().unwrap().num_rows(), 1);
        assert!(op.next().unwrap().is_none());

        let mut op = EmptyOperator::new(false, Arc::new(Schema::empty()));
        assert!(op.next().unwrap().is_none());
    }
}
