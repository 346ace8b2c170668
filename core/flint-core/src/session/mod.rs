//! Session façade: table registration and SQL entry point.
//!
//! A [`SessionContext`] owns the catalog and configuration. `sql()` parses,
//! plans and optimizes eagerly and hands back a [`DataFrame`] that executes
//! on demand.

mod context;
mod dataframe;

pub use context::SessionContext;
pub use dataframe::DataFrame;

use crate::catalog::Catalog;
use crate::config::SessionConfig;
use parking_lot::RwLock;

/// State shared between a session and the DataFrames it produced.
#[derive(Debug, Default)]
pub(crate) struct SessionState {
    pub(crate) catalog: Catalog,
    pub(crate) config: RwLock<SessionConfig>,
}
