//! Filter Operator: WHERE / HAVING evaluation

use crate::error::FlintResult;
use crate::sql::executor::evaluate_predicate;
use crate::sql::executor::operators::PhysicalOperator;
use crate::sql::planner::PhysicalExpr;
use arrow::compute;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;

/// 필터 연산자 (WHERE 조건): NULL/false 행은 제거
pub struct FilterOperator {
    input: Box<dyn PhysicalOperator>,
    predicate: PhysicalExpr,
}

impl FilterOperator {
    pub fn new(input: Box<dyn PhysicalOperator>, predicate: PhysicalExpr) -> Self {
        Self { input, predicate }
    }
}

impl PhysicalOperator for FilterOperator {
    fn schema(&self) -> SchemaRef {
        self.input.schema()
    }

    fn next(&mut self) -> FlintResult<Option<RecordBatch>> {
        while let Some(batch) = self.input.next()? {
            if batch.num_rows() == 0 {
                continue;
            }
            let mask = evaluate_predicate(&self.predicate, &batch)?;
            let filtered = compute::filter_record_batch(&batch, &mask)?;
            if filtered.num_rows() > 0 {
                return Ok(Some(filtered));
            }
        }
        Ok(None)
    }
}
