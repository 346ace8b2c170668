//! Physical Operator Trait: Volcano Execution Model

use crate::error::FlintResult;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;

/// 물리 연산자 트레이트: Volcano 실행 모델 (Pull 기반)
///
/// Every batch an operator returns carries exactly `schema()`. Dropping an
/// operator tree cancels the query and releases its memory reservations.
pub trait PhysicalOperator: Send {
    /// 출력 스키마 반환
    fn schema(&self) -> SchemaRef;

    /// 다음 RecordBatch 반환 (None이면 끝)
    fn next(&mut self) -> FlintResult<Option<RecordBatch>>;
}
