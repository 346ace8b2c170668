//! CSV file table.

use super::listing::{
    FileBatches, FileOpener, FileStream, PartitionedFile, ScanLayout, list_files, open_file,
    total_file_size, with_partition_columns,
};
use super::{BatchStream, Statistics, TableSource};
use crate::error::{FlintError, FlintResult};
use crate::sql::planner::Expr;
use arrow::csv::ReaderBuilder;
use arrow::csv::reader::Format;
use arrow::datatypes::SchemaRef;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

/// Options for reading CSV files.
#[derive(Debug, Clone)]
pub struct CsvReadOptions {
    pub has_header: bool,
    pub delimiter: u8,
    /// Explicit schema; inferred from the first file when `None`
    pub schema: Option<SchemaRef>,
    /// Rows sampled for schema inference
    pub schema_infer_max_records: usize,
    /// Suffix selecting files when the path is a directory
    pub file_extension: String,
    /// `column=value` directory levels, outermost first
    pub table_partition_cols: Vec<String>,
}

impl Default for CsvReadOptions {
    fn default() -> Self {
        Self {
            has_header: true,
            delimiter: b',',
            schema: None,
            schema_infer_max_records: 1000,
            file_extension: ".csv".to_string(),
            table_partition_cols: Vec::new(),
        }
    }
}

impl CsvReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_header(mut self, has_header: bool) -> Self {
        self.has_header = has_header;
        self
    }

    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn schema(mut self, schema: SchemaRef) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn schema_infer_max_records(mut self, max_records: usize) -> Self {
        self.schema_infer_max_records = max_records;
        self
    }

    pub fn file_extension(mut self, extension: impl Into<String>) -> Self {
        self.file_extension = extension.into();
        self
    }

    pub fn table_partition_cols(mut self, columns: Vec<String>) -> Self {
        self.table_partition_cols = columns;
        self
    }
}

/// Table over one CSV file or a (possibly partitioned) directory of them.
#[derive(Debug)]
pub struct CsvTable {
    files: Vec<PartitionedFile>,
    file_schema: SchemaRef,
    schema: SchemaRef,
    options: CsvReadOptions,
    total_bytes: Option<usize>,
}

impl CsvTable {
    pub fn try_new(path: impl AsRef<Path>, options: CsvReadOptions) -> FlintResult<Self> {
        let files = list_files(
            path.as_ref(),
            &options.file_extension,
            &options.table_partition_cols,
        )?;
        let file_schema = match &options.schema {
            Some(schema) => Arc::clone(schema),
            None => infer_schema(&files[0].path, &options)?,
        };
        let schema = with_partition_columns(&file_schema, &options.table_partition_cols)?;
        let total_bytes = total_file_size(&files);
        Ok(Self {
            files,
            file_schema,
            schema,
            options,
            total_bytes,
        })
    }

    pub fn files(&self) -> Vec<&Path> {
        self.files.iter().map(|f| f.path.as_path()).collect()
    }
}

fn format(options: &CsvReadOptions) -> Format {
    Format::default()
        .with_header(options.has_header)
        .with_delimiter(options.delimiter)
}

fn infer_schema(file: &Path, options: &CsvReadOptions) -> FlintResult<SchemaRef> {
    let mut reader = BufReader::new(open_file(file)?);
    let (schema, _) =
        format(options).infer_schema(&mut reader, Some(options.schema_infer_max_records))?;
    Ok(Arc::new(schema))
}

impl TableSource for CsvTable {
    fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    fn scan(
        &self,
        projection: Option<&[usize]>,
        _filter_hint: &[Expr],
        batch_size: usize,
    ) -> FlintResult<BatchStream> {
        let layout = ScanLayout::new(&self.schema, self.file_schema.fields().len(), projection)?;
        let opener = CsvOpener {
            schema: Arc::clone(&self.file_schema),
            has_header: self.options.has_header,
            delimiter: self.options.delimiter,
            batch_size,
        };
        Ok(Box::new(FileStream::new(&self.files, opener, layout)))
    }

    fn statistics(&self) -> Statistics {
        Statistics {
            num_rows: None,
            total_byte_size: self.total_bytes,
        }
    }
}

struct CsvOpener {
    schema: SchemaRef,
    has_header: bool,
    delimiter: u8,
    batch_size: usize,
}

impl FileOpener for CsvOpener {
    fn open(&self, path: &Path, projection: Option<&[usize]>) -> FlintResult<FileBatches> {
        let file = open_file(path)?;
        let mut builder = ReaderBuilder::new(Arc::clone(&self.schema))
            .with_header(self.has_header)
            .with_delimiter(self.delimiter)
            .with_batch_size(self.batch_size);
        if let Some(projection) = projection {
            builder = builder.with_projection(projection.to_vec());
        }
        let reader = builder.build(file)?;
        Ok(Box::new(reader.map(|batch| batch.map_err(FlintError::from))))
    }
}
