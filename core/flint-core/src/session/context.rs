//! SessionContext 구현

use super::{DataFrame, SessionState};
use crate::catalog::{
    CsvReadOptions, CsvTable, MemTable, ParquetReadOptions, ParquetTable, TableSource,
};
use crate::config::SessionConfig;
use crate::error::FlintResult;
use crate::sql::optimizer::QueryOptimizer;
use crate::sql::parser::SqlParser;
use crate::sql::planner::LogicalPlanner;
use arrow::record_batch::RecordBatch;
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Flint 세션: 카탈로그와 설정을 관리하는 메인 API
///
/// # 예제
///
/// ```rust
/// use flint_core::SessionContext;
/// use arrow::array::Int32Array;
/// use arrow::datatypes::{DataType, Field, Schema};
/// use arrow::record_batch::RecordBatch;
/// use std::sync::Arc;
///
/// # fn main() -> flint_core::FlintResult<()> {
/// let ctx = SessionContext::new();
/// let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Int32, false)]));
/// let batch = RecordBatch::try_new(schema, vec![Arc::new(Int32Array::from(vec![1, 2, 3]))])?;
/// ctx.register_batches("t", vec![batch])?;
///
/// let df = ctx.sql("SELECT a FROM t WHERE a > 1")?;
/// assert_eq!(df.count()?, 2);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    state: Arc<SessionState>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session with an explicit configuration; rejected if it does not validate.
    pub fn with_config(config: SessionConfig) -> FlintResult<Self> {
        config.validate()?;
        Ok(Self {
            state: Arc::new(SessionState {
                catalog: Default::default(),
                config: RwLock::new(config),
            }),
        })
    }

    /// Register a table source; fails with `DuplicateTable` if `name` is taken.
    pub fn register_table(&self, name: &str, source: Arc<dyn TableSource>) -> FlintResult<()> {
        self.state.catalog.register(name, source)
    }

    /// Register in-memory batches as a table.
    pub fn register_batches(&self, name: &str, batches: Vec<RecordBatch>) -> FlintResult<()> {
        let table = MemTable::from_batches(batches)?;
        self.register_table(name, Arc::new(table))
    }

    #[instrument(skip(self, path, options), fields(path = %path.as_ref().display()))]
    pub fn register_csv(
        &self,
        name: &str,
        path: impl AsRef<Path>,
        options: CsvReadOptions,
    ) -> FlintResult<()> {
        let table = CsvTable::try_new(path.as_ref(), options)?;
        info!(files = table.files().len(), "registered CSV table");
        self.register_table(name, Arc::new(table))
    }

    #[instrument(skip(self, path, options), fields(path = %path.as_ref().display()))]
    pub fn register_parquet(
        &self,
        name: &str,
        path: impl AsRef<Path>,
        options: ParquetReadOptions,
    ) -> FlintResult<()> {
        let table = ParquetTable::try_new(path.as_ref(), options)?;
        info!("registered Parquet table");
        self.register_table(name, Arc::new(table))
    }

    pub fn deregister_table(&self, name: &str) -> Option<Arc<dyn TableSource>> {
        self.state.catalog.deregister(name)
    }

    pub fn table_exists(&self, name: &str) -> bool {
        self.state.catalog.contains(name)
    }

    /// Registered table names, sorted.
    pub fn table_names(&self) -> Vec<String> {
        self.state.catalog.snapshot().table_names()
    }

    pub fn config(&self) -> SessionConfig {
        self.state.config.read().clone()
    }

    /// Replace the configuration for subsequent queries and collects.
    pub fn set_config(&self, config: SessionConfig) -> FlintResult<()> {
        config.validate()?;
        *self.state.config.write() = config;
        Ok(())
    }

    /// Parse, plan and optimize `sql` against the tables registered now.
    #[instrument(skip(self))]
    pub fn sql(&self, sql: &str) -> FlintResult<DataFrame> {
        let config = self.config();
        let statement = SqlParser::new(config.parser_recursion_limit).parse(sql)?;
        let catalog = self.state.catalog.snapshot();
        let plan = LogicalPlanner::new(&catalog).plan(&statement)?;
        let plan = QueryOptimizer::new(&config.optimizer).optimize(plan)?;
        debug!(target: "flint::sql", "optimized plan:\n{}", plan.display_indent());
        Ok(DataFrame::new(Arc::downgrade(&self.state), plan))
    }
}
