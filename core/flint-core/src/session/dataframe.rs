use super::SessionState;
use crate::error::{FlintError, FlintResult};
use crate::sql::executor::{ExecContext, execute};
use crate::sql::planner::{LogicalPlan, PhysicalPlanner};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use arrow::util::pretty::pretty_format_batches;
use std::sync::{Arc, Weak};
use tracing::{debug, instrument};

/// A planned query. Nothing runs until [`collect`](DataFrame::collect).
///
/// Holds an optimized logical plan and a weak handle to its session; once
/// the session is dropped, executing returns [`FlintError::SessionClosed`].
#[derive(Debug, Clone)]
pub struct DataFrame {
    session: Weak<SessionState>,
    plan: LogicalPlan,
}

impl DataFrame {
    pub(crate) fn new(session: Weak<SessionState>, plan: LogicalPlan) -> Self {
        Self { session, plan }
    }

    /// Output schema, known without executing.
    pub fn schema(&self) -> SchemaRef {
        self.plan.schema().to_arrow()
    }

    pub fn logical_plan(&self) -> &LogicalPlan {
        &self.plan
    }

    fn session(&self) -> FlintResult<Arc<SessionState>> {
        self.session.upgrade().ok_or(FlintError::SessionClosed)
    }

    /// Execute the plan and return every result batch.
    #[instrument(skip(self))]
    pub fn collect(&self) -> FlintResult<Vec<RecordBatch>> {
        let state = self.session()?;
        let config = state.config.read().clone();
        let physical = PhysicalPlanner::new(&config).plan(&self.plan)?;
        let ctx = ExecContext::new(&config);
        let batches = execute(&physical, &ctx)?;
        debug!(batches = batches.len(), "query finished");
        Ok(batches)
    }

    /// Number of result rows.
    pub fn count(&self) -> FlintResult<usize> {
        Ok(self.collect()?.iter().map(RecordBatch::num_rows).sum())
    }

    /// Results as an ASCII table; an empty result still prints the header.
    pub fn to_pretty_string(&self) -> FlintResult<String> {
        let mut batches = self.collect()?;
        if batches.is_empty() {
            batches.push(RecordBatch::new_empty(self.schema()));
        }
        Ok(pretty_format_batches(&batches)?.to_string())
    }

    pub fn show(&self) -> FlintResult<()> {
        println!("{}", self.to_pretty_string()?);
        Ok(())
    }

    /// Logical and physical plans as text.
    pub fn explain(&self) -> FlintResult<String> {
        let state = self.session()?;
        let config = state.config.read().clone();
        let physical = PhysicalPlanner::new(&config).plan(&self.plan)?;
        Ok(format!(
            "logical_plan\n{}physical_plan\n{}",
            self.plan.display_indent(),
            physical.display_indent()
        ))
    }
}

#[cfg(test)]
mod tests {
    use crate::SessionContext;
    use crate::config::SessionConfig;
    use crate::error::FlintError;
    use arrow::array::{Int32Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::record_batch::RecordBatch;
    use std::sync::Arc;

    fn context() -> SessionContext {
        let ctx = SessionContext::new();
        let batch = RecordBatch::try_new(
            Arc::new(Schema::new(vec![
                Field::new("a", DataType::Int32, false),
                Field::new("name", DataType::Utf8, false),
            ])),
            vec![
                Arc::new(Int32Array::from(vec![1, 2, 3])),
                Arc::new(StringArray::from(vec!["x", "y", "z"])),
            ],
        )
        .unwrap();
        ctx.register_batches("t", vec![batch]).unwrap();
        ctx
    }

    #[test]
    fn schema_is_available_before_execution() {
        let df = context().sql("SELECT a AS id, name FROM t").unwrap();
        let schema = df.schema();
        assert_eq!(schema.field(0).name(), "id");
        assert_eq!(schema.field(1).data_type(), &DataType::Utf8);
    }

    #[test]
    fn collect_is_repeatable() {
        let df = context().sql("SELECT a FROM t WHERE a >= 2").unwrap();
        let _keep = df.clone();
        assert_eq!(df.count().unwrap(), 2);
        assert_eq!(df.count().unwrap(), 2);
    }

    #[test]
    fn dropped_session_closes_dataframe() {
        let ctx = context();
        let df = ctx.sql("SELECT a FROM t").unwrap();
        drop(ctx);
        assert!(matches!(df.collect(), Err(FlintError::SessionClosed)));
        assert!(matches!(df.explain(), Err(FlintError::SessionClosed)));
        // planning output stays readable
        assert_eq!(df.schema().fields().len(), 1);
    }

    #[test]
    fn pretty_string_prints_header_for_empty_result() {
        let df = context().sql("SELECT a FROM t WHERE a > 10").unwrap();
        let text = df.to_pretty_string().unwrap();
        assert!(text.contains("| a |"), "{text}");
    }

    #[test]
    fn pretty_string_renders_rows() {
        let df = context()
            .sql("SELECT name FROM t ORDER BY a DESC LIMIT 1")
            .unwrap();
        let text = df.to_pretty_string().unwrap();
        assert_eq!(text, "+------+\n| name |\n+------+\n| z    |\n+------+");
    }

    #[test]
    fn explain_lists_both_plans() {
        let df = context().sql("SELECT a FROM t WHERE a > 1").unwrap();
        let text = df.explain().unwrap();
        assert!(text.starts_with("logical_plan\n"), "{text}");
        assert!(text.contains("physical_plan\n"), "{text}");
        assert!(text.contains("Scan: t"), "{text}");
    }

    #[test]
    fn collect_uses_current_config() {
        let ctx = context();
        let df = ctx.sql("SELECT a FROM t ORDER BY a").unwrap();
        assert_eq!(df.count().unwrap(), 3);
        ctx.set_config(SessionConfig::default().with_memory_limit(1))
            .unwrap();
        assert!(matches!(df.collect(), Err(FlintError::ResourcesExhausted { .. })));
    }
}
