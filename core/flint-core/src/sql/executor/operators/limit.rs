//! Limit Operator: LIMIT/OFFSET clause handling

use crate::error::FlintResult;
use crate::sql::executor::operators::PhysicalOperator;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;

/// Limit 연산자 (LIMIT/OFFSET): fetch 도달 후 입력을 더 당기지 않음
pub struct LimitOperator {
    input: Box<dyn PhysicalOperator>,
    skip: usize,
    fetch: Option<usize>,
    /// Total rows emitted so far
    emitted: usize,
    /// Total rows skipped so far (for offset)
    skipped: usize,
}

impl LimitOperator {
    pub fn new(input: Box<dyn PhysicalOperator>, skip: usize, fetch: Option<usize>) -> Self {
        Self {
            input,
            skip,
            fetch,
            emitted: 0,
            skipped: 0,
        }
    }

    fn remaining(&self) -> usize {
        self.fetch
            .map_or(usize::MAX, |fetch| fetch.saturating_sub(self.emitted))
    }
}

impl PhysicalOperator for LimitOperator {
    fn schema(&self) -> SchemaRef {
        self.input.schema()
    }

    fn next(&mut self) -> FlintResult<Option<RecordBatch>> {
        if self.remaining() == 0 {
            return Ok(None);
        }
        while let Some(batch) = self.input.next()? {
            let rows = batch.num_rows();
            let mut offset = 0;
            if self.skipped < self.skip {
                let to_skip = self.skip - self.skipped;
                if rows <= to_skip {
                    self.skipped += rows;
                    continue;
                }
                self.skipped = self.skip;
                offset = to_skip;
            }
            let take = (rows - offset).min(self.remaining());
            if take == 0 {
                continue;
            }
            self.emitted += take;
            if offset == 0 && take == rows {
                return Ok(Some(batch));
            }
            return Ok(Some(batch.slice(offset, take)));
        }
        Ok(None)
    }
}
