//! # Flint: Embeddable SQL Query Engine
//!
//! Flint는 Apache Arrow 컬럼형 배치 위에서 동작하는 임베디드 SQL 실행 코어입니다.
//! 테이블을 등록하고, SQL을 실행하고, 결과를 `RecordBatch`로 받습니다.
//!
//! ## 주요 특징
//!
//! - **Apache Arrow 기반**: 벡터화 커널로 필터, 프로젝션, 집계 수행
//! - **SQL 지원**: SELECT, WHERE, JOIN, GROUP BY, HAVING, ORDER BY, LIMIT
//! - **규칙 기반 최적화**: Predicate/Projection/Limit Pushdown, Constant Folding
//! - **다양한 소스**: 인메모리 배치, CSV, Parquet
//!
//! ## 빠른 시작
//!
//! ```rust
//! use flint_core::SessionContext;
//! use arrow::array::{Int32Array, StringArray};
//! use arrow::datatypes::{DataType, Field, Schema};
//! use arrow::record_batch::RecordBatch;
//! use std::sync::Arc;
//!
//! # fn main() -> flint_core::FlintResult<()> {
//! let ctx = SessionContext::new();
//!
//! // 테이블 등록
//! let schema = Arc::new(Schema::new(vec![
//!     Field::new("id", DataType::Int32, false),
//!     Field::new("name", DataType::Utf8, false),
//! ]));
//! let batch = RecordBatch::try_new(
//!     schema,
//!     vec![
//!         Arc::new(Int32Array::from(vec![1, 2, 3])),
//!         Arc::new(StringArray::from(vec!["Alice", "Bob", "Carol"])),
//!     ],
//! )?;
//! ctx.register_batches("users", vec![batch])?;
//!
//! // 쿼리 실행
//! let df = ctx.sql("SELECT name FROM users WHERE id >= 2 ORDER BY id")?;
//! assert_eq!(df.count()?, 2);
//! # Ok(())
//! # }
//! ```
//!
//! ## SQL 실행 파이프라인
//!
//! ```text
//! SQL 문자열 → Parser → AST → LogicalPlanner → LogicalPlan
//!          → Optimizer → PhysicalPlanner → PhysicalPlan → Executor → RecordBatch
//! ```
//!
//! ## 모듈 구조
//!
//! - [`session`]: 세션과 DataFrame ([`SessionContext`], [`DataFrame`])
//! - [`catalog`]: 테이블 등록과 `TableSource` 구현
//! - [`sql`]: SQL 파서, 플래너, 최적화기, 실행기
//! - [`batch`]: 스칼라 값과 배치 유틸리티
//! - [`config`]: 세션 설정
//! - [`error`]: 에러 타입

pub mod batch;
pub mod catalog;
pub mod config;
pub mod error;
pub mod session;
pub mod sql;

// Logging utilities
pub mod logging;

// Re-export commonly used types
pub use batch::ScalarValue;
pub use catalog::{
    Catalog, CsvReadOptions, CsvTable, MemTable, ParquetReadOptions, ParquetTable, Statistics,
    TableSource,
};
pub use config::{OptimizerConfig, SessionConfig};
pub use error::{ErrorCode, ErrorKind, FlintError, FlintResult};
pub use session::{DataFrame, SessionContext};
