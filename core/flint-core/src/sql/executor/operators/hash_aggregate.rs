//! Hash Aggregate Operator: GROUP BY + aggregate functions

use crate::batch::ScalarValue;
use crate::error::{FlintError, FlintResult};
use crate::sql::executor::evaluate_expr;
use crate::sql::executor::memory::{MemoryPool, MemoryReservation};
use crate::sql::executor::operators::PhysicalOperator;
use crate::sql::planner::{AggregateFunction, PhysicalAggExpr, PhysicalExpr};
use ahash::AHashMap;
use arrow::array::{Array, ArrayRef, AsArray, Float64Array, Int64Array, new_null_array};
use arrow::compute;
use arrow::datatypes::{DataType, Float64Type, Int64Type, SchemaRef};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use arrow::row::{RowConverter, Rows, SortField};
use std::cmp::Ordering;
use std::sync::Arc;

/// Hash Aggregate 연산자 (GROUP BY + 집계)
///
/// Group keys are encoded with Arrow's row format, so any number of key
/// columns of any supported type hash as one byte string. Without GROUP BY
/// the operator emits exactly one row, even for empty input.
pub struct HashAggregateOperator {
    input: Box<dyn PhysicalOperator>,
    group_by: Vec<PhysicalExpr>,
    aggregates: Vec<PhysicalAggExpr>,
    schema: SchemaRef,
    batch_size: usize,
    reservation: MemoryReservation,
    result: Option<RecordBatch>,
    offset: usize,
    materialized: bool,
}

impl HashAggregateOperator {
    pub fn new(
        input: Box<dyn PhysicalOperator>,
        group_by: Vec<PhysicalExpr>,
        aggregates: Vec<PhysicalAggExpr>,
        schema: SchemaRef,
        batch_size: usize,
        pool: &Arc<MemoryPool>,
    ) -> Self {
        Self {
            input,
            group_by,
            aggregates,
            schema,
            batch_size: batch_size.max(1),
            reservation: MemoryReservation::new(pool, "HashAggregateExec"),
            result: None,
            offset: 0,
            materialized: false,
        }
    }

    fn materialize(&mut self) -> FlintResult<()> {
        let mut groups = if self.group_by.is_empty() {
            Groups::Global
        } else {
            let fields = self.schema.fields()[..self.group_by.len()]
                .iter()
                .map(|f| SortField::new(f.data_type().clone()))
                .collect();
            let converter = RowConverter::new(fields)?;
            let keys = converter.empty_rows(0, 0);
            Groups::Keyed {
                converter,
                keys,
                map: AHashMap::new(),
            }
        };
        let mut accumulators = self
            .aggregates
            .iter()
            .map(Accumulator::try_new)
            .collect::<FlintResult<Vec<_>>>()?;

        let mut group_ids = Vec::new();
        while let Some(batch) = self.input.next()? {
            if batch.num_rows() == 0 {
                continue;
            }
            let num_groups = groups.assign(&self.group_by, &batch, &mut group_ids)?;
            for (acc, agg) in accumulators.iter_mut().zip(&self.aggregates) {
                let arg = agg
                    .arg
                    .as_ref()
                    .map(|arg| evaluate_expr(arg, &batch))
                    .transpose()?;
                acc.update(&group_ids, num_groups, arg.as_ref())?;
            }

            let state = groups.size() + accumulators.iter().map(Accumulator::size).sum::<usize>();
            if state > self.reservation.size() {
                self.reservation.try_grow(state - self.reservation.size())?;
            }
        }

        let num_groups = groups.len();
        let mut columns = groups.finish()?;
        for (acc, field) in accumulators
            .into_iter()
            .zip(&self.schema.fields()[self.group_by.len()..])
        {
            columns.push(acc.finish(num_groups, field.data_type())?);
        }
        let options = RecordBatchOptions::new().with_row_count(Some(num_groups));
        self.result = Some(RecordBatch::try_new_with_options(
            Arc::clone(&self.schema),
            columns,
            &options,
        )?);
        Ok(())
    }
}

impl PhysicalOperator for HashAggregateOperator {
    fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    fn next(&mut self) -> FlintResult<Option<RecordBatch>> {
        if !self.materialized {
            self.materialized = true;
            self.materialize()?;
        }
        let Some(result) = self.result.as_ref() else {
            return Ok(None);
        };
        if self.offset >= result.num_rows() {
            self.result = None;
            self.reservation.free();
            return Ok(None);
        }
        let len = self.batch_size.min(result.num_rows() - self.offset);
        let chunk = result.slice(self.offset, len);
        self.offset += len;
        Ok(Some(chunk))
    }
}

/// Group id assignment.
enum Groups {
    /// No GROUP BY: every row belongs to group 0
    Global,
    Keyed {
        converter: RowConverter,
        /// Distinct keys in first-seen order; index is the group id
        keys: Rows,
        map: AHashMap<Box<[u8]>, usize>,
    },
}

impl Groups {
    /// Fill `ids` with the group of each row; returns the group count.
    fn assign(
        &mut self,
        group_by: &[PhysicalExpr],
        batch: &RecordBatch,
        ids: &mut Vec<usize>,
    ) -> FlintResult<usize> {
        ids.clear();
        match self {
            Groups::Global => {
                ids.resize(batch.num_rows(), 0);
                Ok(1)
            }
            Groups::Keyed {
                converter,
                keys,
                map,
            } => {
                let arrays = group_by
                    .iter()
                    .map(|expr| evaluate_expr(expr, batch))
                    .collect::<FlintResult<Vec<_>>>()?;
                let rows = converter.convert_columns(&arrays)?;
                for row in rows.iter() {
                    let id = match map.get(row.as_ref()) {
                        Some(id) => *id,
                        None => {
                            let id = map.len();
                            map.insert(Box::from(row.as_ref()), id);
                            keys.push(row);
                            id
                        }
                    };
                    ids.push(id);
                }
                Ok(map.len())
            }
        }
    }

    fn len(&self) -> usize {
        match self {
            Groups::Global => 1,
            Groups::Keyed { map, .. } => map.len(),
        }
    }

    fn size(&self) -> usize {
        match self {
            Groups::Global => 0,
            Groups::Keyed { keys, map, .. } => {
                keys.size() * 2 + map.capacity() * std::mem::size_of::<(Box<[u8]>, usize)>()
            }
        }
    }

    /// Decode the group key columns.
    fn finish(self) -> FlintResult<Vec<ArrayRef>> {
        match self {
            Groups::Global => Ok(Vec::new()),
            Groups::Keyed { converter, keys, .. } => Ok(converter.convert_rows(&keys)?),
        }
    }
}

/// Per-group aggregate state.
enum Accumulator {
    /// `count_all` counts rows (`COUNT(*)`), otherwise non-null values
    Count { counts: Vec<i64>, count_all: bool },
    SumInt { sums: Vec<Option<i64>> },
    SumFloat { sums: Vec<Option<f64>> },
    Avg { sums: Vec<f64>, counts: Vec<i64> },
    /// Values are compared in `input_type`, then cast to the output type
    MinMax {
        best: Vec<ScalarValue>,
        keep: Ordering,
        input_type: DataType,
    },
}

impl Accumulator {
    fn try_new(agg: &PhysicalAggExpr) -> FlintResult<Self> {
        Ok(match (agg.func, &agg.data_type) {
            (AggregateFunction::Count, _) => Accumulator::Count {
                counts: Vec::new(),
                count_all: agg.arg.is_none(),
            },
            (AggregateFunction::Sum, DataType::Int64) => Accumulator::SumInt { sums: Vec::new() },
            (AggregateFunction::Sum, DataType::Float64) => {
                Accumulator::SumFloat { sums: Vec::new() }
            }
            (AggregateFunction::Avg, DataType::Float64) => Accumulator::Avg {
                sums: Vec::new(),
                counts: Vec::new(),
            },
            (AggregateFunction::Min | AggregateFunction::Max, dt) => Accumulator::MinMax {
                best: Vec::new(),
                keep: if agg.func == AggregateFunction::Min {
                    Ordering::Less
                } else {
                    Ordering::Greater
                },
                input_type: comparable_type(dt)?,
            },
            (func, dt) => {
                return Err(FlintError::NotSupported(format!("{func} producing {dt:?}")));
            }
        })
    }

    fn update(
        &mut self,
        groups: &[usize],
        num_groups: usize,
        arg: Option<&ArrayRef>,
    ) -> FlintResult<()> {
        match self {
            Accumulator::Count { counts, count_all } => {
                counts.resize(num_groups, 0);
                match arg {
                    Some(array) if !*count_all => {
                        for (row, group) in groups.iter().enumerate() {
                            if array.is_valid(row) {
                                counts[*group] += 1;
                            }
                        }
                    }
                    _ => groups.iter().for_each(|group| counts[*group] += 1),
                }
            }
            Accumulator::SumInt { sums } => {
                sums.resize(num_groups, None);
                let array = cast_arg(arg, &DataType::Int64)?;
                let values = array.as_primitive::<Int64Type>();
                for (row, group) in groups.iter().enumerate() {
                    if values.is_valid(row) {
                        let current = sums[*group].unwrap_or(0);
                        let sum = current.checked_add(values.value(row)).ok_or_else(|| {
                            FlintError::Execution("integer overflow in sum".to_string())
                        })?;
                        sums[*group] = Some(sum);
                    }
                }
            }
            Accumulator::SumFloat { sums } => {
                sums.resize(num_groups, None);
                let array = cast_arg(arg, &DataType::Float64)?;
                let values = array.as_primitive::<Float64Type>();
                for (row, group) in groups.iter().enumerate() {
                    if values.is_valid(row) {
                        *sums[*group].get_or_insert(0.0) += values.value(row);
                    }
                }
            }
            Accumulator::Avg { sums, counts } => {
                sums.resize(num_groups, 0.0);
                counts.resize(num_groups, 0);
                let array = cast_arg(arg, &DataType::Float64)?;
                let values = array.as_primitive::<Float64Type>();
                for (row, group) in groups.iter().enumerate() {
                    if values.is_valid(row) {
                        sums[*group] += values.value(row);
                        counts[*group] += 1;
                    }
                }
            }
            Accumulator::MinMax {
                best,
                keep,
                input_type,
            } => {
                best.resize(num_groups, ScalarValue::Null);
                let array = cast_arg(arg, input_type)?;
                for (row, group) in groups.iter().enumerate() {
                    if array.is_null(row) {
                        continue;
                    }
                    let value = ScalarValue::from_array(&array, row)?;
                    let slot = &mut best[*group];
                    if slot.is_null() || value.compare(slot) == Some(*keep) {
                        *slot = value;
                    }
                }
            }
        }
        Ok(())
    }

    fn size(&self) -> usize {
        match self {
            Accumulator::Count { counts, .. } => counts.capacity() * 8,
            Accumulator::SumInt { sums } => sums.capacity() * 16,
            Accumulator::SumFloat { sums } => sums.capacity() * 16,
            Accumulator::Avg { sums, counts } => (sums.capacity() + counts.capacity()) * 8,
            Accumulator::MinMax { best, .. } => {
                best.capacity() * std::mem::size_of::<ScalarValue>()
                    + best
                        .iter()
                        .map(|v| match v {
                            ScalarValue::Utf8(s) => s.capacity(),
                            _ => 0,
                        })
                        .sum::<usize>()
            }
        }
    }

    /// Produce one value per group in `output_type`.
    fn finish(self, num_groups: usize, output_type: &DataType) -> FlintResult<ArrayRef> {
        Ok(match self {
            Accumulator::Count { mut counts, .. } => {
                counts.resize(num_groups, 0);
                Arc::new(Int64Array::from(counts))
            }
            Accumulator::SumInt { mut sums } => {
                sums.resize(num_groups, None);
                Arc::new(Int64Array::from(sums))
            }
            Accumulator::SumFloat { mut sums } => {
                sums.resize(num_groups, None);
                Arc::new(Float64Array::from(sums))
            }
            Accumulator::Avg { sums, counts } => {
                let values: Vec<Option<f64>> = (0..num_groups)
                    .map(|g| match counts.get(g) {
                        Some(count) if *count > 0 => Some(sums[g] / *count as f64),
                        _ => None,
                    })
                    .collect();
                Arc::new(Float64Array::from(values))
            }
            Accumulator::MinMax {
                mut best,
                input_type,
                ..
            } => {
                best.resize(num_groups, ScalarValue::Null);
                if *output_type == DataType::Null {
                    return Ok(new_null_array(&DataType::Null, num_groups));
                }
                let array = ScalarValue::iter_to_array(&best, &input_type)?;
                if array.data_type() == output_type {
                    array
                } else {
                    compute::cast(&array, output_type)?
                }
            }
        })
    }
}

/// Type min/max values are held in while aggregating.
fn comparable_type(data_type: &DataType) -> FlintResult<DataType> {
    match data_type {
        DataType::Int8 | DataType::Int16 | DataType::Int32 => Ok(DataType::Int32),
        DataType::Float32 | DataType::Float64 => Ok(DataType::Float64),
        DataType::LargeUtf8 | DataType::Utf8 => Ok(DataType::Utf8),
        DataType::Null | DataType::Boolean | DataType::Int64 => Ok(data_type.clone()),
        other => Err(FlintError::NotSupported(format!("min/max over {other:?}"))),
    }
}

fn cast_arg(arg: Option<&ArrayRef>, data_type: &DataType) -> FlintResult<ArrayRef> {
    let array = arg.ok_or_else(|| FlintError::Internal("aggregate argument missing".to_string()))?;
    if array.data_type() == data_type {
        return Ok(Arc::clone(array));
    }
    Ok(compute::cast(array, data_type)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::executor::operators::test_util::MockOperator;
    use arrow::array::{Int32Array, StringArray};
    use arrow::datatypes::{Field, Int32Type, Schema};

    fn input() -> RecordBatch {
        RecordBatch::try_new(
            Arc::new(Schema::new(vec![
                Field::new("k", DataType::Utf8, true),
                Field::new("v", DataType::Int32, true),
            ])),
            vec![
                Arc::new(StringArray::from(vec![Some("a"), Some("b"), Some("a"), None, Some("b")])),
                Arc::new(Int32Array::from(vec![Some(1), Some(10), Some(3), Some(7), None])),
            ],
        )
        .unwrap()
    }

    fn agg(func: AggregateFunction, arg: Option<usize>, data_type: DataType) -> PhysicalAggExpr {
        PhysicalAggExpr {
            func,
            arg: arg.map(PhysicalExpr::Column),
            data_type,
        }
    }

    fn output_schema(group: bool) -> SchemaRef {
        let mut fields = Vec::new();
        if group {
            fields.push(Field::new("k", DataType::Utf8, true));
        }
        fields.extend([
            Field::new("count(*)", DataType::Int64, false),
            Field::new("sum(v)", DataType::Int64, true),
            Field::new("avg(v)", DataType::Float64, true),
            Field::new("min(v)", DataType::Int32, true),
        ]);
        Arc::new(Schema::new(fields))
    }

    fn aggregates() -> Vec<PhysicalAggExpr> {
        vec![
            agg(AggregateFunction::Count, None, DataType::Int64),
            agg(AggregateFunction::Sum, Some(1), DataType::Int64),
            agg(AggregateFunction::Avg, Some(1), DataType::Float64),
            agg(AggregateFunction::Min, Some(1), DataType::Int32),
        ]
    }

    #[test]
    fn groups_by_key_including_null_group() {
        let pool = Arc::new(MemoryPool::unbounded());
        let mut op = HashAggregateOperator::new(
            Box::new(MockOperator::new(vec![input()])),
            vec![PhysicalExpr::Column(0)],
            aggregates(),
            output_schema(true),
            1024,
            &pool,
        );
        let out = op.next().unwrap().unwrap();
        assert!(op.next().unwrap().is_none());
        assert_eq!(out.num_rows(), 3);

        let keys = out.column(0).as_string::<i32>();
        let row_of = |key: Option<&str>| {
            (0..3)
                .find(|&i| keys.is_valid(i).then(|| keys.value(i)) == key)
                .unwrap()
        };

        let a = row_of(Some("a"));
        assert_eq!(out.column(1).as_primitive::<Int64Type>().value(a), 2);
        assert_eq!(out.column(2).as_primitive::<Int64Type>().value(a), 4);
        assert_eq!(out.column(3).as_primitive::<Float64Type>().value(a), 2.0);
        assert_eq!(out.column(4).as_primitive::<Int32Type>().value(a), 1);

        let b = row_of(Some("b"));
        assert_eq!(out.column(1).as_primitive::<Int64Type>().value(b), 2);
        assert_eq!(out.column(2).as_primitive::<Int64Type>().value(b), 10);

        let null_group = row_of(None);
        assert_eq!(
            out.column(2).as_primitive::<Int64Type>().value(null_group),
            7
        );
    }

    #[test]
    fn global_aggregate_on_empty_input_emits_one_row() {
        let pool = Arc::new(MemoryPool::unbounded());
        let empty = RecordBatch::new_empty(input().schema());
        let mut op = HashAggregateOperator::new(
            Box::new(MockOperator::with_schema(empty.schema(), vec![])),
            vec![],
            aggregates(),
            output_schema(false),
            1024,
            &pool,
        );
        let out = op.next().unwrap().unwrap();
        assert_eq!(out.num_rows(), 1);
        assert_eq!(out.column(0).as_primitive::<Int64Type>().value(0), 0);
        assert!(out.column(1).is_null(0));
        assert!(out.column(2).is_null(0));
        assert!(out.column(3).is_null(0));
    }

    #[test]
    fn grouped_aggregate_on_empty_input_emits_nothing() {
        let pool = Arc::new(MemoryPool::unbounded());
        let mut op = HashAggregateOperator::new(
            Box::new(MockOperator::with_schema(input().schema(), vec![])),
            vec![PhysicalExpr::Column(0)],
            aggregates(),
            output_schema(true),
            1024,
            &pool,
        );
        assert!(op.next().unwrap().is_none());
    }

    #[test]
    fn sum_overflow_is_an_error() {
        let pool = Arc::new(MemoryPool::unbounded());
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, false)]));
        let batch = RecordBatch::try_new(
            Arc::clone(&schema),
            vec![Arc::new(Int64Array::from(vec![i64::MAX, 1]))],
        )
        .unwrap();
        let out_schema = Arc::new(Schema::new(vec![Field::new("sum(v)", DataType::Int64, true)]));
        let mut op = HashAggregateOperator::new(
            Box::new(MockOperator::new(vec![batch])),
            vec![],
            vec![agg(AggregateFunction::Sum, Some(0), DataType::Int64)],
            out_schema,
            1024,
            &pool,
        );
        assert!(matches!(op.next(), Err(FlintError::Execution(_))));
    }
}
