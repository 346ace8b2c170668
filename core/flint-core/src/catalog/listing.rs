//! File discovery and the scan loop shared by file-backed tables.
//!
//! A table directory may be partitioned Hive style
//! (`region=eu/part-0.csv`). Each configured partition column becomes a
//! trailing non-nullable Utf8 column whose value is taken from the
//! directory name.

use crate::error::{FlintError, FlintResult};
use arrow::array::{ArrayRef, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use std::collections::VecDeque;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A data file and the partition values read from its directory path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PartitionedFile {
    pub path: PathBuf,
    pub partition_values: Vec<String>,
}

/// Files backing a path: the file itself, or every file ending in
/// `extension` under a directory, sorted by path.
///
/// With partition columns the files are looked up `partition_cols.len()`
/// levels down, one `column=value` directory per level. Entries that do not
/// follow the layout are skipped.
pub(crate) fn list_files(
    path: &Path,
    extension: &str,
    partition_cols: &[String],
) -> FlintResult<Vec<PartitionedFile>> {
    if path.is_file() {
        if !partition_cols.is_empty() {
            return Err(FlintError::InvalidSchema(format!(
                "partition columns need a directory, got file {}",
                path.display()
            )));
        }
        return Ok(vec![PartitionedFile {
            path: path.to_path_buf(),
            partition_values: Vec::new(),
        }]);
    }
    let mut files = Vec::new();
    collect_files(path, extension, partition_cols, &mut Vec::new(), &mut files)?;
    files.sort_by(|a, b| a.path.cmp(&b.path));
    if files.is_empty() {
        return Err(FlintError::Io {
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no '{extension}' files under {}", path.display()),
            ),
        });
    }
    Ok(files)
}

fn collect_files(
    dir: &Path,
    extension: &str,
    partition_cols: &[String],
    values: &mut Vec<String>,
    out: &mut Vec<PartitionedFile>,
) -> FlintResult<()> {
    let depth = values.len();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(column) = partition_cols.get(depth) {
            let value = name
                .strip_prefix(column.as_str())
                .and_then(|rest| rest.strip_prefix('='));
            if let Some(value) = value.filter(|_| path.is_dir()) {
                values.push(value.to_string());
                collect_files(&path, extension, partition_cols, values, out)?;
                values.pop();
            }
        } else if path.is_file() && name.ends_with(extension) {
            out.push(PartitionedFile {
                path,
                partition_values: values.clone(),
            });
        }
    }
    Ok(())
}

/// Total on-disk size of `files`, if every size is readable.
pub(crate) fn total_file_size(files: &[PartitionedFile]) -> Option<usize> {
    files
        .iter()
        .map(|f| std::fs::metadata(&f.path).ok().map(|m| m.len() as usize))
        .sum()
}

/// Table schema: the file schema followed by the partition columns.
pub(crate) fn with_partition_columns(
    file_schema: &SchemaRef,
    partition_cols: &[String],
) -> FlintResult<SchemaRef> {
    if partition_cols.is_empty() {
        return Ok(Arc::clone(file_schema));
    }
    let mut fields: Vec<Field> = file_schema
        .fields()
        .iter()
        .map(|f| f.as_ref().clone())
        .collect();
    for column in partition_cols {
        if fields.iter().any(|f| f.name() == column) {
            return Err(FlintError::InvalidSchema(format!(
                "partition column '{column}' is also a file column"
            )));
        }
        fields.push(Field::new(column, DataType::Utf8, false));
    }
    Ok(Arc::new(Schema::new_with_metadata(fields, file_schema.metadata().clone())))
}

/// Open `path` for reading, naming the path in the error.
pub(crate) fn open_file(path: &Path) -> FlintResult<File> {
    File::open(path).map_err(|e| FlintError::Io {
        source: std::io::Error::new(e.kind(), format!("{}: {e}", path.display())),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputColumn {
    /// Position in the batch read from the file
    File(usize),
    /// Index into the file's partition values
    Partition(usize),
}

/// Maps a table-level projection onto file reads plus partition values.
#[derive(Debug)]
pub(crate) struct ScanLayout {
    /// File columns to read, ascending; `None` reads every column
    file_projection: Option<Vec<usize>>,
    outputs: Vec<OutputColumn>,
    schema: SchemaRef,
    /// File batches already have the output shape
    passthrough: bool,
}

impl ScanLayout {
    pub fn new(
        table_schema: &SchemaRef,
        file_width: usize,
        projection: Option<&[usize]>,
    ) -> FlintResult<Self> {
        let width = table_schema.fields().len();
        let requested: Vec<usize> = match projection {
            Some(indices) => indices.to_vec(),
            None => (0..width).collect(),
        };
        if let Some(index) = requested.iter().find(|&&i| i >= width) {
            return Err(FlintError::Internal(format!(
                "projection index {index} out of range for {width} columns"
            )));
        }

        let mut file_columns: Vec<usize> = requested
            .iter()
            .copied()
            .filter(|&i| i < file_width)
            .collect();
        file_columns.sort_unstable();
        file_columns.dedup();
        let outputs: Vec<OutputColumn> = requested
            .iter()
            .map(|&i| match i.checked_sub(file_width) {
                Some(partition) => OutputColumn::Partition(partition),
                None => OutputColumn::File(file_columns.partition_point(|&c| c < i)),
            })
            .collect();
        // 파티션 컬럼만 읽을 때도 행 수는 파일에서 얻는다
        if file_columns.is_empty() && file_width > 0 {
            file_columns.push(0);
        }
        let passthrough = outputs.len() == file_columns.len()
            && outputs
                .iter()
                .enumerate()
                .all(|(pos, column)| *column == OutputColumn::File(pos));

        Ok(Self {
            file_projection: (file_columns.len() < file_width).then_some(file_columns),
            outputs,
            schema: Arc::new(table_schema.project(&requested)?),
            passthrough,
        })
    }

    pub fn file_projection(&self) -> Option<&[usize]> {
        self.file_projection.as_deref()
    }

    /// Reorder a file batch and append the partition columns.
    pub fn project(
        &self,
        batch: RecordBatch,
        partition_values: &[String],
    ) -> FlintResult<RecordBatch> {
        if self.passthrough {
            return Ok(batch);
        }
        let rows = batch.num_rows();
        let columns: Vec<ArrayRef> = self
            .outputs
            .iter()
            .map(|column| match *column {
                OutputColumn::File(pos) => Arc::clone(batch.column(pos)),
                OutputColumn::Partition(index) => {
                    let value = partition_values.get(index).map_or("", String::as_str);
                    Arc::new(StringArray::from_iter_values(std::iter::repeat_n(
                        value, rows,
                    ))) as ArrayRef
                }
            })
            .collect();
        let options = RecordBatchOptions::new().with_row_count(Some(rows));
        Ok(RecordBatch::try_new_with_options(Arc::clone(&self.schema), columns, &options)?)
    }
}

/// Batches read from a single file.
pub(crate) type FileBatches = Box<dyn Iterator<Item = FlintResult<RecordBatch>> + Send>;

/// Format-specific reader for one file of a table.
pub(crate) trait FileOpener: Send {
    fn open(&self, path: &Path, projection: Option<&[usize]>) -> FlintResult<FileBatches>;
}

/// Opens files one at a time as the previous one is exhausted.
///
/// The first error ends the stream.
pub(crate) struct FileStream<O> {
    files: VecDeque<PartitionedFile>,
    opener: O,
    layout: ScanLayout,
    current: Option<(FileBatches, Vec<String>)>,
}

impl<O: FileOpener> FileStream<O> {
    pub fn new(files: &[PartitionedFile], opener: O, layout: ScanLayout) -> Self {
        Self {
            files: files.iter().cloned().collect(),
            opener,
            layout,
            current: None,
        }
    }

    fn open_next(&mut self) -> FlintResult<bool> {
        let Some(file) = self.files.pop_front() else {
            return Ok(false);
        };
        let batches = self
            .opener
            .open(&file.path, self.layout.file_projection())?;
        self.current = Some((batches, file.partition_values));
        Ok(true)
    }
}

impl<O: FileOpener> Iterator for FileStream<O> {
    type Item = FlintResult<RecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((batches, values)) = self.current.as_mut() {
                match batches.next() {
                    Some(Ok(batch)) => return Some(self.layout.project(batch, values)),
                    Some(Err(e)) => {
                        self.current = None;
                        self.files.clear();
                        return Some(Err(e));
                    }
                    None => self.current = None,
                }
            }
            match self.open_next() {
                Ok(true) => continue,
                Ok(false) => return None,
                Err(e) => {
                    self.files.clear();
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{AsArray, Int32Array};
    use arrow::datatypes::Int32Type;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"x").unwrap();
    }

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn lists_partition_directories_in_order() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("region=us/day=2/b.csv"));
        touch(&dir.path().join("region=eu/day=1/a.csv"));
        touch(&dir.path().join("region=eu/day=1/notes.txt"));
        touch(&dir.path().join("region=eu/stray.csv"));
        touch(&dir.path().join("other/day=1/c.csv"));

        let files = list_files(dir.path(), ".csv", &cols(&["region", "day"])).unwrap();
        let values: Vec<Vec<String>> = files.iter().map(|f| f.partition_values.clone()).collect();
        assert_eq!(values, vec![cols(&["eu", "1"]), cols(&["us", "2"])]);
    }

    #[test]
    fn partition_columns_require_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.csv");
        touch(&path);
        assert!(matches!(
            list_files(&path, ".csv", &cols(&["region"])),
            Err(FlintError::InvalidSchema(_))
        ));
    }

    #[test]
    fn partition_column_clashing_with_file_column_rejected() {
        let schema = Arc::new(Schema::new(vec![Field::new("region", DataType::Utf8, true)]));
        assert!(matches!(
            with_partition_columns(&schema, &cols(&["region"])),
            Err(FlintError::InvalidSchema(_))
        ));
    }

    #[test]
    fn layout_appends_partition_values() {
        let file_schema = Arc::new(Schema::new(vec![
            Field::new("a", DataType::Int32, false),
            Field::new("b", DataType::Int32, false),
        ]));
        let table_schema = with_partition_columns(&file_schema, &cols(&["region"])).unwrap();

        // partition column first, then b
        let layout = ScanLayout::new(&table_schema, 2, Some(&[2, 1])).unwrap();
        assert_eq!(layout.file_projection(), Some(&[1][..]));
        let read = RecordBatch::try_new(
            Arc::new(file_schema.project(&[1]).unwrap()),
            vec![Arc::new(Int32Array::from(vec![7, 8]))],
        )
        .unwrap();
        let out = layout.project(read, &cols(&["eu"])).unwrap();
        assert_eq!(out.schema().field(0).name(), "region");
        assert_eq!(out.column(0).as_string::<i32>().value(1), "eu");
        assert_eq!(
            out.column(1).as_primitive::<Int32Type>().values().to_vec(),
            vec![7, 8]
        );

        // only the partition column: one file column is still read for the row count
        let layout = ScanLayout::new(&table_schema, 2, Some(&[2])).unwrap();
        assert_eq!(layout.file_projection(), Some(&[0][..]));

        let layout = ScanLayout::new(&file_schema, 2, None).unwrap();
        assert_eq!(layout.file_projection(), None);
        assert!(layout.passthrough);
    }
}
