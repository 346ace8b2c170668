//! Columnar batch helpers.
//!
//! The unit of data flow is Arrow's `RecordBatch`. This module adds the
//! scalar type the planner folds literals into, a row-to-column builder with
//! schema enforcement, and the re-chunking used to bound batch sizes.

use crate::error::{FlintError, FlintResult};
use arrow::array::{
    Array, ArrayRef, AsArray, BooleanArray, BooleanBuilder, Float64Array, Float64Builder,
    Int32Array, Int32Builder, Int64Array, Int64Builder, NullArray, StringArray, StringBuilder,
};
use arrow::datatypes::{DataType, Float64Type, Int32Type, Int64Type, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// A single typed value.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Utf8(String),
}

impl ScalarValue {
    /// Get the Arrow DataType for this value.
    pub fn data_type(&self) -> DataType {
        match self {
            ScalarValue::Null => DataType::Null,
            ScalarValue::Boolean(_) => DataType::Boolean,
            ScalarValue::Int32(_) => DataType::Int32,
            ScalarValue::Int64(_) => DataType::Int64,
            ScalarValue::Float64(_) => DataType::Float64,
            ScalarValue::Utf8(_) => DataType::Utf8,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    /// Extract a value from an Arrow array at the given index.
    pub fn from_array(array: &ArrayRef, idx: usize) -> FlintResult<Self> {
        if array.is_null(idx) {
            return Ok(ScalarValue::Null);
        }
        match array.data_type() {
            DataType::Null => Ok(ScalarValue::Null),
            DataType::Boolean => Ok(ScalarValue::Boolean(array.as_boolean().value(idx))),
            DataType::Int32 => Ok(ScalarValue::Int32(array.as_primitive::<Int32Type>().value(idx))),
            DataType::Int64 => Ok(ScalarValue::Int64(array.as_primitive::<Int64Type>().value(idx))),
            DataType::Float64 => Ok(ScalarValue::Float64(
                array.as_primitive::<Float64Type>().value(idx),
            )),
            DataType::Utf8 => Ok(ScalarValue::Utf8(
                array.as_string::<i32>().value(idx).to_string(),
            )),
            dt => Err(FlintError::type_mismatch("Boolean|Int32|Int64|Float64|Utf8", dt)),
        }
    }

    /// Broadcast the value into an array of `len` rows.
    pub fn to_array(&self, len: usize) -> ArrayRef {
        match self {
            ScalarValue::Null => Arc::new(NullArray::new(len)),
            ScalarValue::Boolean(v) => Arc::new(BooleanArray::from(vec![*v; len])),
            ScalarValue::Int32(v) => Arc::new(Int32Array::from_value(*v, len)),
            ScalarValue::Int64(v) => Arc::new(Int64Array::from_value(*v, len)),
            ScalarValue::Float64(v) => Arc::new(Float64Array::from_value(*v, len)),
            ScalarValue::Utf8(v) => {
                Arc::new(StringArray::from_iter_values(std::iter::repeat_n(v, len)))
            }
        }
    }

    /// Total order within each type; values of different types are incomparable.
    pub fn compare(&self, other: &ScalarValue) -> Option<Ordering> {
        match (self, other) {
            (ScalarValue::Boolean(a), ScalarValue::Boolean(b)) => Some(a.cmp(b)),
            (ScalarValue::Int32(a), ScalarValue::Int32(b)) => Some(a.cmp(b)),
            (ScalarValue::Int64(a), ScalarValue::Int64(b)) => Some(a.cmp(b)),
            (ScalarValue::Float64(a), ScalarValue::Float64(b)) => Some(a.total_cmp(b)),
            (ScalarValue::Utf8(a), ScalarValue::Utf8(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => write!(f, "NULL"),
            ScalarValue::Boolean(v) => write!(f, "Boolean({v})"),
            ScalarValue::Int32(v) => write!(f, "Int32({v})"),
            ScalarValue::Int64(v) => write!(f, "Int64({v})"),
            ScalarValue::Float64(v) => write!(f, "Float64({v})"),
            ScalarValue::Utf8(v) => write!(f, "Utf8(\"{v}\")"),
        }
    }
}

/// Check the schema invariant that field names are unique.
pub fn validate_schema(schema: &Schema) -> FlintResult<()> {
    let mut seen = HashSet::with_capacity(schema.fields().len());
    for field in schema.fields() {
        if !seen.insert(field.name().as_str()) {
            return Err(FlintError::InvalidSchema(format!(
                "duplicate field name '{}'",
                field.name()
            )));
        }
    }
    Ok(())
}

/// Split batches so that none exceeds `target_rows`; empty batches are dropped.
pub fn rechunk(batches: Vec<RecordBatch>, target_rows: usize) -> Vec<RecordBatch> {
    let target_rows = target_rows.max(1);
    let mut out = Vec::with_capacity(batches.len());
    for batch in batches {
        let rows = batch.num_rows();
        if rows == 0 {
            continue;
        }
        if rows <= target_rows {
            out.push(batch);
            continue;
        }
        let mut offset = 0;
        while offset < rows {
            let len = target_rows.min(rows - offset);
            out.push(batch.slice(offset, len));
            offset += len;
        }
    }
    out
}

/// Accumulates rows of scalars and converts them to a `RecordBatch`.
pub struct BatchBuilder {
    schema: SchemaRef,
    rows: Vec<Vec<ScalarValue>>,
}

impl BatchBuilder {
    pub fn new(schema: SchemaRef) -> Self {
        Self {
            schema,
            rows: Vec::new(),
        }
    }

    /// Append a row. Must match the schema's field count, types and nullability.
    pub fn append_row(&mut self, values: Vec<ScalarValue>) -> FlintResult<()> {
        let field_count = self.schema.fields().len();
        if values.len() != field_count {
            return Err(FlintError::InvalidSchema(format!(
                "expected {field_count} columns, got {}",
                values.len()
            )));
        }

        for (value, field) in values.iter().zip(self.schema.fields()) {
            if value.is_null() {
                if !field.is_nullable() {
                    return Err(FlintError::InvalidSchema(format!(
                        "NULL in non-nullable column '{}'",
                        field.name()
                    )));
                }
            } else if value.data_type() != *field.data_type() {
                return Err(FlintError::TypeMismatch {
                    expected: format!("column '{}': {:?}", field.name(), field.data_type()),
                    actual: format!("{:?}", value.data_type()),
                });
            }
        }

        self.rows.push(values);
        Ok(())
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn finish(self) -> FlintResult<RecordBatch> {
        if self.rows.is_empty() {
            return Ok(RecordBatch::new_empty(self.schema));
        }
        let columns = self
            .schema
            .fields()
            .iter()
            .enumerate()
            .map(|(idx, field)| build_column(&self.rows, idx, field.data_type()))
            .collect::<FlintResult<Vec<_>>>()?;
        Ok(RecordBatch::try_new(self.schema, columns)?)
    }
}

fn build_column(
    rows: &[Vec<ScalarValue>],
    idx: usize,
    data_type: &DataType,
) -> FlintResult<ArrayRef> {
    ScalarValue::iter_to_array(rows.iter().map(|row| &row[idx]), data_type)
}

impl ScalarValue {
    /// Build an array of `data_type` from values; `Null` and values of
    /// another type become nulls.
    pub fn iter_to_array<'a>(
        values: impl IntoIterator<Item = &'a ScalarValue>,
        data_type: &DataType,
    ) -> FlintResult<ArrayRef> {
        macro_rules! build {
            ($builder:expr, $variant:ident) => {{
                let mut builder = $builder;
                for value in values {
                    match value {
                        ScalarValue::$variant(v) => builder.append_value(v.clone()),
                        _ => builder.append_null(),
                    }
                }
                Ok(Arc::new(builder.finish()) as ArrayRef)
            }};
        }
        match data_type {
            DataType::Null => Ok(Arc::new(NullArray::new(values.into_iter().count()))),
            DataType::Boolean => build!(BooleanBuilder::new(), Boolean),
            DataType::Int32 => build!(Int32Builder::new(), Int32),
            DataType::Int64 => build!(Int64Builder::new(), Int64),
            DataType::Float64 => build!(Float64Builder::new(), Float64),
            DataType::Utf8 => build!(StringBuilder::new(), Utf8),
            dt => Err(FlintError::NotSupported(format!("column type {dt:?}"))),
        }
    }
}
