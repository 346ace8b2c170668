//! Projection Operator: SELECT list evaluation

use crate::error::FlintResult;
use crate::sql::executor::evaluate_expr;
use crate::sql::executor::operators::PhysicalOperator;
use crate::sql::planner::PhysicalExpr;
use arrow::array::ArrayRef;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use std::sync::Arc;

/// Projection 연산자 (SELECT 컬럼 계산)
pub struct ProjectionOperator {
    input: Box<dyn PhysicalOperator>,
    exprs: Vec<PhysicalExpr>,
    schema: SchemaRef,
}

impl ProjectionOperator {
    pub fn new(
        input: Box<dyn PhysicalOperator>,
        exprs: Vec<PhysicalExpr>,
        schema: SchemaRef,
    ) -> Self {
        Self {
            input,
            exprs,
            schema,
        }
    }
}

impl PhysicalOperator for ProjectionOperator {
    fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    fn next(&mut self) -> FlintResult<Option<RecordBatch>> {
        let Some(batch) = self.input.next()? else {
            return Ok(None);
        };
        let columns = self
            .exprs
            .iter()
            .map(|expr| evaluate_expr(expr, &batch))
            .collect::<FlintResult<Vec<ArrayRef>>>()?;
        // zero expressions still carry the row count
        let options = RecordBatchOptions::new().with_row_count(Some(batch.num_rows()));
        Ok(Some(RecordBatch::try_new_with_options(Arc::clone(&self.schema), columns, &options)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::ScalarValue;
    use crate::sql::executor::operators::test_util::{MockOperator, int_batch};
    use crate::sql::planner::BinaryOperator;
    use arrow::array::AsArray;
    use arrow::datatypes::{DataType, Field, Int64Type, Schema};

    #[test]
    fn computes_expressions() {
        let input = Box::new(MockOperator::new(vec![int_batch(&[1, 2, 3])]));
        let schema = Arc::new(Schema::new(vec![
            Field::new("v", DataType::Int64, true),
            Field::new("doubled", DataType::Int64, true),
        ]));
        let exprs = vec![
            PhysicalExpr::Column(0),
            PhysicalExpr::BinaryOp {
                left: Box::new(PhysicalExpr::Column(0)),
                op: BinaryOperator::Multiply,
                right: Box::new(PhysicalExpr::Literal(ScalarValue::Int64(2))),
            },
        ];
        let mut project = ProjectionOperator::new(input, exprs, schema);
        let out = project.next().unwrap().unwrap();
        assert_eq!(out.schema().field(1).name(), "doubled");
        assert_eq!(
            out.column(1).as_primitive::<Int64Type>().values().to_vec(),
            vec![2, 4, 6]
        );
    }

    #[test]
    fn empty_projection_keeps_rows() {
        let input = Box::new(MockOperator::new(vec![int_batch(&[1, 2, 3])]));
        let mut project = ProjectionOperator::new(input, vec![], Arc::new(Schema::empty()));
        let out = project.next().unwrap().unwrap();
        assert_eq!(out.num_columns(), 0);
        assert_eq!(out.num_rows(), 3);
    }
}
