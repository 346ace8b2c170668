//! Error types for the Flint query engine.
//!
//! All public APIs return `FlintResult<T>`; library code does not panic.

use thiserror::Error;

/// Unified error type for all Flint operations.
#[derive(Debug, Error)]
pub enum FlintError {
    // ── Syntax ──────────────────────────────────────────────────────────
    /// Malformed SQL; `line`/`column` point at the offending token (1-based, 0 if unknown)
    #[error("SQL parse error at line {line}, column {column}: {message}")]
    SqlParse {
        message: String,
        line: u64,
        column: u64,
    },

    // ── Planning ────────────────────────────────────────────────────────
    /// Requested table does not exist in the catalog snapshot
    #[error("table '{0}' not found")]
    TableNotFound(String),

    /// Column reference could not be resolved in the current scope
    #[error("column '{0}' not found")]
    ColumnNotFound(String),

    /// Unqualified column matches more than one input relation
    #[error("ambiguous column reference '{column}' (candidates: {candidates})")]
    AmbiguousColumn { column: String, candidates: String },

    /// Incompatible operand or argument types
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// Valid SQL that the engine does not support
    #[error("SQL feature not supported: {0}")]
    NotSupported(String),

    /// Any other planning failure
    #[error("plan error: {0}")]
    Plan(String),

    // ── Execution ───────────────────────────────────────────────────────
    /// Integer division or modulo by zero
    #[error("division by zero")]
    DivisionByZero,

    /// Buffered operator state exceeded the configured memory limit
    #[error("resources exhausted: {operator} requested {requested} bytes ({used} of {limit} in use)")]
    ResourcesExhausted {
        operator: String,
        requested: usize,
        used: usize,
        limit: usize,
    },

    /// Any other runtime failure
    #[error("execution error: {0}")]
    Execution(String),

    /// Apache Arrow error (kernels, CSV reader)
    #[error("arrow error: {source}")]
    Arrow { source: arrow::error::ArrowError },

    /// Apache Parquet error (file I/O)
    #[error("parquet error: {source}")]
    Parquet {
        #[from]
        source: parquet::errors::ParquetError,
    },

    /// Standard I/O error
    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    // ── Catalog / session ───────────────────────────────────────────────
    /// A table with this name is already registered
    #[error("table '{0}' already registered")]
    DuplicateTable(String),

    /// Schema violates an invariant (e.g. duplicate field names)
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// Configuration value out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The session that created a DataFrame has been dropped
    #[error("session context has been closed")]
    SessionClosed,

    /// Broken engine invariant
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<arrow::error::ArrowError> for FlintError {
    fn from(source: arrow::error::ArrowError) -> Self {
        match source {
            arrow::error::ArrowError::DivideByZero => FlintError::DivisionByZero,
            arrow::error::ArrowError::IoError(msg, err) => FlintError::Io {
                source: std::io::Error::new(err.kind(), msg),
            },
            source => FlintError::Arrow { source },
        }
    }
}

/// Coarse error class, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Syntax,
    Plan,
    Execution,
    DuplicateName,
    Other,
}

/// Stable numeric codes for callers on the far side of a foreign boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    Arrow = 1,
    Parquet,
    Io,
    Sql,
    NotImplemented,
    Internal,
    Plan,
    Schema,
    Execution,
    ResourcesExhausted,
}

impl FlintError {
    /// Classify the error into its pipeline stage.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FlintError::SqlParse { .. } => ErrorKind::Syntax,
            FlintError::TableNotFound(_)
            | FlintError::ColumnNotFound(_)
            | FlintError::AmbiguousColumn { .. }
            | FlintError::TypeMismatch { .. }
            | FlintError::NotSupported(_)
            | FlintError::Plan(_) => ErrorKind::Plan,
            FlintError::DivisionByZero
            | FlintError::ResourcesExhausted { .. }
            | FlintError::Execution(_)
            | FlintError::Arrow { .. }
            | FlintError::Parquet { .. }
            | FlintError::Io { .. } => ErrorKind::Execution,
            FlintError::DuplicateTable(_) => ErrorKind::DuplicateName,
            FlintError::InvalidSchema(_)
            | FlintError::InvalidConfig(_)
            | FlintError::SessionClosed
            | FlintError::Internal(_) => ErrorKind::Other,
        }
    }

    /// Boundary error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            FlintError::SqlParse { .. } => ErrorCode::Sql,
            FlintError::NotSupported(_) => ErrorCode::NotImplemented,
            FlintError::TableNotFound(_)
            | FlintError::ColumnNotFound(_)
            | FlintError::AmbiguousColumn { .. }
            | FlintError::TypeMismatch { .. }
            | FlintError::Plan(_)
            | FlintError::DuplicateTable(_) => ErrorCode::Plan,
            FlintError::InvalidSchema(_) => ErrorCode::Schema,
            FlintError::DivisionByZero | FlintError::Execution(_) | FlintError::SessionClosed => {
                ErrorCode::Execution
            }
            FlintError::ResourcesExhausted { .. } => ErrorCode::ResourcesExhausted,
            FlintError::Arrow { .. } => ErrorCode::Arrow,
            FlintError::Parquet { .. } => ErrorCode::Parquet,
            FlintError::Io { .. } => ErrorCode::Io,
            FlintError::InvalidConfig(_) | FlintError::Internal(_) => ErrorCode::Internal,
        }
    }

    pub(crate) fn type_mismatch(expected: impl Into<String>, actual: impl std::fmt::Debug) -> Self {
        FlintError::TypeMismatch {
            expected: expected.into(),
            actual: format!("{actual:?}"),
        }
    }
}

/// Result type alias for all Flint operations.
pub type FlintResult<T> = Result<T, FlintError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_table_not_found() {
        let err = FlintError::TableNotFound("users".to_string());
        assert_eq!(err.to_string(), "table 'users' not found");
    }

    #[test]
    fn error_display_sql_parse_carries_position() {
        let err = FlintError::SqlParse {
            message: "Expected: end of statement, found: x".to_string(),
            line: 1,
            column: 17,
        };
        assert_eq!(
            err.to_string(),
            "SQL parse error at line 1, column 17: Expected: end of statement, found: x"
        );
    }

    #[test]
    fn arrow_divide_by_zero_maps_to_execution_error() {
        let err: FlintError = arrow::error::ArrowError::DivideByZero.into();
        assert!(matches!(err, FlintError::DivisionByZero));
        assert_eq!(err.kind(), ErrorKind::Execution);
        assert_eq!(err.code(), ErrorCode::Execution);
    }

    #[test]
    fn other_arrow_errors_are_wrapped() {
        let err: FlintError = arrow::error::ArrowError::ComputeError("boom".into()).into();
        assert!(matches!(err, FlintError::Arrow { .. }));
        assert_eq!(err.code(), ErrorCode::Arrow);
    }

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.csv");
        let err: FlintError = io_err.into();
        assert!(err.to_string().contains("missing.csv"));
        assert_eq!(err.kind(), ErrorKind::Execution);
    }

    #[test]
    fn error_kinds() {
        assert_eq!(
            FlintError::ColumnNotFound("x".into()).kind(),
            ErrorKind::Plan
        );
        assert_eq!(
            FlintError::DuplicateTable("t".into()).kind(),
            ErrorKind::DuplicateName
        );
        assert_eq!(
            FlintError::SqlParse {
                message: String::new(),
                line: 0,
                column: 0
            }
            .kind(),
            ErrorKind::Syntax
        );
        assert_eq!(FlintError::SessionClosed.kind(), ErrorKind::Other);
    }
}
