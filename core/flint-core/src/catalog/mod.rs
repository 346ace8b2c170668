//! Catalog: table registry and the `TableSource` boundary.
//!
//! The catalog is copy-on-write: registration swaps in a new map while
//! planners keep reading the snapshot they cloned when `sql()` was called.

mod csv;
mod listing;
mod memory;
mod parquet;

pub use csv::{CsvReadOptions, CsvTable};
pub use memory::MemTable;
pub use parquet::{ParquetReadOptions, ParquetTable};

use crate::batch::validate_schema;
use crate::error::{FlintError, FlintResult};
use crate::sql::planner::Expr;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Lazily produced batches from a table source.
pub type BatchStream = Box<dyn Iterator<Item = FlintResult<RecordBatch>> + Send>;

/// Size estimates a source may report to the physical planner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
    pub num_rows: Option<usize>,
    pub total_byte_size: Option<usize>,
}

/// A queryable table: schema plus data access.
pub trait TableSource: Send + Sync + fmt::Debug {
    fn schema(&self) -> SchemaRef;

    /// Stream the table.
    ///
    /// `projection` lists the source column indices to return, in ascending
    /// order. `filter_hint` holds conjuncts over the source's columns that
    /// the caller applies anyway; a source may use them to skip data.
    fn scan(
        &self,
        projection: Option<&[usize]>,
        filter_hint: &[Expr],
        batch_size: usize,
    ) -> FlintResult<BatchStream>;

    fn statistics(&self) -> Statistics {
        Statistics::default()
    }
}

/// Immutable view of the registered tables.
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    tables: Arc<HashMap<String, Arc<dyn TableSource>>>,
}

impl CatalogSnapshot {
    pub fn get(&self, name: &str) -> Option<&Arc<dyn TableSource>> {
        self.tables.get(name)
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Mutable table registry owned by a session.
#[derive(Debug, Default)]
pub struct Catalog {
    current: RwLock<CatalogSnapshot>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `source` under `name`; an existing entry is kept and reported.
    pub fn register(&self, name: &str, source: Arc<dyn TableSource>) -> FlintResult<()> {
        validate_schema(&source.schema())?;
        let mut current = self.current.write();
        if current.tables.contains_key(name) {
            return Err(FlintError::DuplicateTable(name.to_string()));
        }
        Arc::make_mut(&mut current.tables).insert(name.to_string(), source);
        debug!(target: "flint::catalog", table = name, "registered table");
        Ok(())
    }

    /// Remove a table, returning its source if it was registered.
    pub fn deregister(&self, name: &str) -> Option<Arc<dyn TableSource>> {
        let mut current = self.current.write();
        if !current.tables.contains_key(name) {
            return None;
        }
        let removed = Arc::make_mut(&mut current.tables).remove(name);
        debug!(target: "flint::catalog", table = name, "deregistered table");
        removed
    }

    pub fn contains(&self, name: &str) -> bool {
        self.current.read().tables.contains_key(name)
    }

    /// Consistent view for planning; later registrations do not affect it.
    pub fn snapshot(&self) -> CatalogSnapshot {
        self.current.read().clone()
    }
}
