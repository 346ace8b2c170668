//! In-memory table backed by Arrow record batches.

use super::{BatchStream, Statistics, TableSource};
use crate::batch::rechunk;
use crate::error::{FlintError, FlintResult};
use crate::sql::planner::Expr;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;

/// Table over batches already held in memory. Scans share the column buffers.
#[derive(Debug, Clone)]
pub struct MemTable {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

impl MemTable {
    /// Every batch must have exactly `schema`'s column types and names.
    pub fn try_new(schema: SchemaRef, batches: Vec<RecordBatch>) -> FlintResult<Self> {
        for batch in &batches {
            let batch_schema = batch.schema();
            let compatible = batch_schema.fields().len() == schema.fields().len()
                && batch_schema
                    .fields()
                    .iter()
                    .zip(schema.fields())
                    .all(|(a, b)| a.name() == b.name() && a.data_type() == b.data_type());
            if !compatible {
                return Err(FlintError::InvalidSchema(format!(
                    "batch schema {batch_schema:?} does not match table schema {schema:?}"
                )));
            }
        }
        Ok(Self { schema, batches })
    }

    /// Take the schema from the first batch.
    pub fn from_batches(batches: Vec<RecordBatch>) -> FlintResult<Self> {
        let schema = batches
            .first()
            .map(|b| b.schema())
            .ok_or_else(|| {
                FlintError::InvalidSchema("cannot infer a schema from zero batches".to_string())
            })?;
        Self::try_new(schema, batches)
    }

    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }
}

impl TableSource for MemTable {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn scan(
        &self,
        projection: Option<&[usize]>,
        _filter_hint: &[Expr],
        batch_size: usize,
    ) -> FlintResult<BatchStream> {
        let batches = match projection {
            Some(indices) => self
                .batches
                .iter()
                .map(|b| b.project(indices))
                .collect::<Result<Vec<_>, _>>()?,
            None => self.batches.clone(),
        };
        let chunks = rechunk(batches, batch_size);
        Ok(Box::new(chunks.into_iter().map(Ok)))
    }

    fn statistics(&self) -> Statistics {
        Statistics {
            num_rows: Some(self.batches.iter().map(RecordBatch::num_rows).sum()),
            total_byte_size: Some(
                self.batches
                    .iter()
                    .map(RecordBatch::get_array_memory_size)
                    .sum(),
            ),
        }
    }
}
