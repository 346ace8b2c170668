//! Parquet file table.

use super::listing::{
    FileBatches, FileOpener, FileStream, PartitionedFile, ScanLayout, list_files, open_file,
    total_file_size, with_partition_columns,
};
use super::{BatchStream, Statistics, TableSource};
use crate::batch::ScalarValue;
use crate::error::{FlintError, FlintResult};
use crate::sql::planner::{BinaryOperator, Expr};
use arrow::datatypes::{DataType, Schema, SchemaRef};
use parquet::arrow::ProjectionMask;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::file::metadata::RowGroupMetaData;
use parquet::file::statistics::Statistics as ColumnStatistics;
use parquet::schema::types::SchemaDescriptor;
use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;
use tracing::trace;

/// Options for reading Parquet files.
#[derive(Debug, Clone)]
pub struct ParquetReadOptions {
    /// Suffix selecting files when the path is a directory
    pub file_extension: String,
    /// `column=value` directory levels, outermost first
    pub table_partition_cols: Vec<String>,
    /// Skip row groups whose min/max statistics rule out the scan filters
    pub parquet_pruning: bool,
}

impl Default for ParquetReadOptions {
    fn default() -> Self {
        Self {
            file_extension: ".parquet".to_string(),
            table_partition_cols: Vec::new(),
            parquet_pruning: true,
        }
    }
}

impl ParquetReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file_extension(mut self, extension: impl Into<String>) -> Self {
        self.file_extension = extension.into();
        self
    }

    pub fn table_partition_cols(mut self, columns: Vec<String>) -> Self {
        self.table_partition_cols = columns;
        self
    }

    pub fn parquet_pruning(mut self, enabled: bool) -> Self {
        self.parquet_pruning = enabled;
        self
    }
}

/// Table over one Parquet file or a directory of files sharing a schema.
#[derive(Debug)]
pub struct ParquetTable {
    files: Vec<PartitionedFile>,
    file_schema: SchemaRef,
    schema: SchemaRef,
    pruning: bool,
    num_rows: Option<usize>,
    total_bytes: Option<usize>,
}

impl ParquetTable {
    /// Read every footer up front; all files must carry the same columns.
    pub fn try_new(path: impl AsRef<Path>, options: ParquetReadOptions) -> FlintResult<Self> {
        let files = list_files(
            path.as_ref(),
            &options.file_extension,
            &options.table_partition_cols,
        )?;
        let mut file_schema: Option<SchemaRef> = None;
        let mut num_rows = 0usize;
        for file in &files {
            let builder = ParquetRecordBatchReaderBuilder::try_new(open_file(&file.path)?)?;
            num_rows += usize::try_from(builder.metadata().file_metadata().num_rows()).unwrap_or(0);
            let first = file_schema.get_or_insert_with(|| Arc::clone(builder.schema()));
            if first.fields() != builder.schema().fields() {
                return Err(FlintError::InvalidSchema(format!(
                    "{} does not match the schema of {}",
                    file.path.display(),
                    files[0].path.display()
                )));
            }
        }
        let file_schema = file_schema.unwrap_or_else(|| Arc::new(Schema::empty()));
        let schema = with_partition_columns(&file_schema, &options.table_partition_cols)?;
        let total_bytes = total_file_size(&files);
        Ok(Self {
            files,
            file_schema,
            schema,
            pruning: options.parquet_pruning,
            num_rows: Some(num_rows),
            total_bytes,
        })
    }
}

impl TableSource for ParquetTable {
    fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    fn scan(
        &self,
        projection: Option<&[usize]>,
        filter_hint: &[Expr],
        batch_size: usize,
    ) -> FlintResult<BatchStream> {
        let layout = ScanLayout::new(&self.schema, self.file_schema.fields().len(), projection)?;
        let predicates = if self.pruning {
            filter_hint
                .iter()
                .filter_map(|expr| RangePredicate::try_from_expr(expr, &self.file_schema))
                .collect()
        } else {
            Vec::new()
        };
        let opener = ParquetOpener {
            batch_size,
            predicates,
        };
        Ok(Box::new(FileStream::new(&self.files, opener, layout)))
    }

    fn statistics(&self) -> Statistics {
        Statistics {
            num_rows: self.num_rows,
            total_byte_size: self.total_bytes,
        }
    }
}

struct ParquetOpener {
    batch_size: usize,
    predicates: Vec<RangePredicate>,
}

impl FileOpener for ParquetOpener {
    fn open(&self, path: &Path, projection: Option<&[usize]>) -> FlintResult<FileBatches> {
        let mut builder = ParquetRecordBatchReaderBuilder::try_new(open_file(path)?)?
            .with_batch_size(self.batch_size);
        if !self.predicates.is_empty() {
            let total = builder.metadata().num_row_groups();
            let keep = prune_row_groups(
                builder.parquet_schema(),
                builder.metadata().row_groups(),
                &self.predicates,
            );
            if keep.len() < total {
                trace!(
                    target: "flint::catalog",
                    file = %path.display(),
                    kept = keep.len(),
                    total,
                    "pruned row groups"
                );
                builder = builder.with_row_groups(keep);
            }
        }
        if let Some(projection) = projection {
            let mask = ProjectionMask::roots(builder.parquet_schema(), projection.iter().copied());
            builder = builder.with_projection(mask);
        }
        let reader = builder.build()?;
        Ok(Box::new(reader.map(|batch| batch.map_err(FlintError::from))))
    }
}

/// Value compared against row-group statistics.
#[derive(Debug, Clone, PartialEq)]
enum StatValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl StatValue {
    fn compare(&self, other: &StatValue) -> Option<Ordering> {
        match (self, other) {
            (StatValue::Int(a), StatValue::Int(b)) => Some(a.cmp(b)),
            (StatValue::Int(a), StatValue::Float(b)) => (*a as f64).partial_cmp(b),
            (StatValue::Float(a), StatValue::Int(b)) => a.partial_cmp(&(*b as f64)),
            (StatValue::Float(a), StatValue::Float(b)) => a.partial_cmp(b),
            (StatValue::Str(a), StatValue::Str(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

/// `column op literal` conjunct over an integer or string column.
///
/// Float columns are left alone: NaN is absent from the statistics but sorts
/// above every number in comparisons.
#[derive(Debug, Clone)]
struct RangePredicate {
    column: String,
    op: BinaryOperator,
    value: StatValue,
}

impl RangePredicate {
    fn try_from_expr(expr: &Expr, file_schema: &Schema) -> Option<Self> {
        let Expr::BinaryOp { left, op, right } = expr else {
            return None;
        };
        let (column, op, literal) = match (column_name(left), column_name(right)) {
            (Some(column), None) => (column, *op, right.as_ref()),
            (None, Some(column)) => (column, flip(*op), left.as_ref()),
            _ => return None,
        };
        if !matches!(
            op,
            BinaryOperator::Eq
                | BinaryOperator::Lt
                | BinaryOperator::LtEq
                | BinaryOperator::Gt
                | BinaryOperator::GtEq
        ) {
            return None;
        }
        let Expr::Literal(literal) = literal else {
            return None;
        };
        let field = file_schema.field_with_name(column).ok()?;
        let value = match (field.data_type(), literal) {
            (DataType::Int32 | DataType::Int64, ScalarValue::Int32(v)) => {
                StatValue::Int(i64::from(*v))
            }
            (DataType::Int32 | DataType::Int64, ScalarValue::Int64(v)) => StatValue::Int(*v),
            (DataType::Int32 | DataType::Int64, ScalarValue::Float64(v)) => StatValue::Float(*v),
            (DataType::Utf8, ScalarValue::Utf8(v)) => StatValue::Str(v.clone()),
            _ => return None,
        };
        Some(Self {
            column: column.to_string(),
            op,
            value,
        })
    }

    /// False only when no row of the group can satisfy the predicate.
    fn may_match(&self, stats: Option<&ColumnStatistics>) -> bool {
        let Some((min, max)) = stats.and_then(min_max) else {
            return true;
        };
        let (Some(low), Some(high)) = (min.compare(&self.value), max.compare(&self.value)) else {
            return true;
        };
        match self.op {
            BinaryOperator::Eq => low != Ordering::Greater && high != Ordering::Less,
            BinaryOperator::Lt => low == Ordering::Less,
            BinaryOperator::LtEq => low != Ordering::Greater,
            BinaryOperator::Gt => high == Ordering::Greater,
            BinaryOperator::GtEq => high != Ordering::Less,
            _ => true,
        }
    }
}

/// Column a comparison side reads, looking through widening casts.
fn column_name(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Column(column) => Some(column.name.as_str()),
        Expr::Cast { expr, data_type }
            if matches!(data_type, DataType::Int64 | DataType::Float64) =>
        {
            match expr.as_ref() {
                Expr::Column(column) => Some(column.name.as_str()),
                _ => None,
            }
        }
        _ => None,
    }
}

/// `lit op col` as `col op' lit`
fn flip(op: BinaryOperator) -> BinaryOperator {
    match op {
        BinaryOperator::Lt => BinaryOperator::Gt,
        BinaryOperator::LtEq => BinaryOperator::GtEq,
        BinaryOperator::Gt => BinaryOperator::Lt,
        BinaryOperator::GtEq => BinaryOperator::LtEq,
        other => other,
    }
}

fn min_max(stats: &ColumnStatistics) -> Option<(StatValue, StatValue)> {
    match stats {
        ColumnStatistics::Int32(s) => Some((
            StatValue::Int(i64::from(*s.min_opt()?)),
            StatValue::Int(i64::from(*s.max_opt()?)),
        )),
        ColumnStatistics::Int64(s) => {
            Some((StatValue::Int(*s.min_opt()?), StatValue::Int(*s.max_opt()?)))
        }
        ColumnStatistics::ByteArray(s) => Some((
            StatValue::Str(s.min_opt()?.as_utf8().ok()?.to_string()),
            StatValue::Str(s.max_opt()?.as_utf8().ok()?.to_string()),
        )),
        _ => None,
    }
}

/// Indices of the row groups every predicate may match.
fn prune_row_groups(
    schema: &SchemaDescriptor,
    row_groups: &[RowGroupMetaData],
    predicates: &[RangePredicate],
) -> Vec<usize> {
    let leaves: Vec<Option<usize>> = predicates
        .iter()
        .map(|p| {
            schema
                .columns()
                .iter()
                .position(|c| matches!(c.path().parts(), [only] if only == &p.column))
        })
        .collect();
    row_groups
        .iter()
        .enumerate()
        .filter(|(_, group)| {
            predicates
                .iter()
                .zip(&leaves)
                .all(|(predicate, leaf)| match leaf {
                    Some(leaf) => predicate.may_match(group.column(*leaf).statistics()),
                    None => true,
                })
        })
        .map(|(index, _)| index)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{AsArray, Float64Array, Int32Array, StringArray};
    use crate::sql::planner::Column;
    use arrow::datatypes::{DataType, Field, Int32Type, Schema};
    use arrow::record_batch::RecordBatch;
    use parquet::arrow::ArrowWriter;
    use parquet::file::properties::WriterProperties;
    use std::fs::File;

    fn write_parquet(path: &Path, ids: Vec<i32>) {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int32, false),
            Field::new("name", DataType::Utf8, false),
            Field::new("score", DataType::Float64, true),
        ]));
        let names: Vec<String> = ids.iter().map(|i| format!("item_{i}")).collect();
        let scores: Vec<f64> = ids.iter().map(|i| *i as f64 * 1.5).collect();
        let batch = RecordBatch::try_new(
            Arc::clone(&schema),
            vec![
                Arc::new(Int32Array::from(ids)),
                Arc::new(StringArray::from(names)),
                Arc::new(Float64Array::from(scores)),
            ],
        )
        .unwrap();
        let mut writer = ArrowWriter::try_new(File::create(path).unwrap(), schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn reads_schema_and_statistics() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.parquet");
        write_parquet(&path, vec![1, 2, 3]);
        let table = ParquetTable::try_new(&path, ParquetReadOptions::new()).unwrap();
        assert_eq!(table.schema().fields().len(), 3);
        assert_eq!(table.statistics().num_rows, Some(3));
    }

    #[test]
    fn projection_in_requested_order() {
        let dir = tempfile::tempdir().unwrap();
        write_parquet(&dir.path().join("a.parquet"), vec![1, 2]);
        write_parquet(&dir.path().join("b.parquet"), vec![3]);
        let table = ParquetTable::try_new(dir.path(), ParquetReadOptions::new()).unwrap();

        let batches: Vec<RecordBatch> = table
            .scan(Some(&[2, 0]), &[], 1024)
            .unwrap()
            .collect::<FlintResult<_>>()
            .unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].schema().field(0).name(), "score");
        assert_eq!(batches[0].schema().field(1).name(), "id");
        let ids: Vec<i32> = batches
            .iter()
            .flat_map(|b| b.column(1).as_primitive::<Int32Type>().values().to_vec())
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    /// ids 1..=6 in row groups of two
    fn write_row_groups(path: &Path) {
        let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int32, false)]));
        let batch = RecordBatch::try_new(
            Arc::clone(&schema),
            vec![Arc::new(Int32Array::from(vec![1, 2, 3, 4, 5, 6]))],
        )
        .unwrap();
        let props = WriterProperties::builder()
            .set_max_row_group_size(2)
            .build();
        let mut writer =
            ArrowWriter::try_new(File::create(path).unwrap(), schema, Some(props)).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();
    }

    fn scan_ids(table: &ParquetTable, filter: Expr) -> Vec<i32> {
        table
            .scan(None, &[filter], 1024)
            .unwrap()
            .collect::<FlintResult<Vec<_>>>()
            .unwrap()
            .iter()
            .flat_map(|b| b.column(0).as_primitive::<Int32Type>().values().to_vec())
            .collect()
    }

    fn id() -> Expr {
        Expr::col(Column::new(None::<&str>, "id"))
    }

    #[test]
    fn row_groups_pruned_by_statistics() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.parquet");
        write_row_groups(&path);
        let table = ParquetTable::try_new(&path, ParquetReadOptions::new()).unwrap();

        let gt = Expr::binary(id(), BinaryOperator::Gt, Expr::lit(ScalarValue::Int32(4)));
        assert_eq!(scan_ids(&table, gt.clone()), vec![5, 6]);

        // literal on the left, column widened by a cast
        let widened = Expr::Cast {
            expr: Box::new(id()),
            data_type: DataType::Int64,
        };
        let ge = Expr::binary(
            Expr::lit(ScalarValue::Int64(3)),
            BinaryOperator::GtEq,
            widened,
        );
        assert_eq!(scan_ids(&table, ge), vec![1, 2, 3, 4]);

        let eq = Expr::binary(id(), BinaryOperator::Eq, Expr::lit(ScalarValue::Int32(9)));
        assert!(scan_ids(&table, eq).is_empty());

        // with pruning off every row group is read
        let options = ParquetReadOptions::new().parquet_pruning(false);
        let unpruned = ParquetTable::try_new(&path, options).unwrap();
        assert_eq!(scan_ids(&unpruned, gt), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn unsupported_filters_keep_every_row_group() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.parquet");
        write_row_groups(&path);
        let table = ParquetTable::try_new(&path, ParquetReadOptions::new()).unwrap();

        let ne = Expr::binary(
            id(),
            BinaryOperator::NotEq,
            Expr::lit(ScalarValue::Int32(1)),
        );
        assert_eq!(scan_ids(&table, ne).len(), 6);
        let modulo = Expr::binary(
            Expr::binary(
                id(),
                BinaryOperator::Modulo,
                Expr::lit(ScalarValue::Int32(2)),
            ),
            BinaryOperator::Eq,
            Expr::lit(ScalarValue::Int32(0)),
        );
        assert_eq!(scan_ids(&table, modulo).len(), 6);
    }

    #[test]
    fn mismatched_file_schemas_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_parquet(&dir.path().join("a.parquet"), vec![1]);
        write_row_groups(&dir.path().join("b.parquet"));
        let err = ParquetTable::try_new(dir.path(), ParquetReadOptions::new()).unwrap_err();
        assert!(matches!(err, FlintError::InvalidSchema(_)));
    }

    #[test]
    fn defaults_and_setters() {
        let defaults = ParquetReadOptions::default();
        assert!(defaults.parquet_pruning);
        assert!(defaults.table_partition_cols.is_empty());
        let options = ParquetReadOptions::new()
            .parquet_pruning(false)
            .table_partition_cols(vec!["region".to_string()]);
        assert!(!options.parquet_pruning);
        assert_eq!(options.table_partition_cols, vec!["region"]);
    }
}
